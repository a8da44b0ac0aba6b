//! The single read model shared between the refresh cycle and its consumers

use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use super::history::{CurrencySeries, HistoricalPoint};
use super::quote::QuoteMap;

pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketSnapshot {
    /// `None` until the first successful quote fetch.
    pub quotes: Option<QuoteMap>,
    pub series: BTreeMap<String, CurrencySeries>,
    /// Advances only with a successful quote fetch.
    pub last_updated_at: Option<DateTime<Local>>,
}

impl MarketSnapshot {
    pub fn last_updated_label(&self, format: &str) -> Option<String> {
        self.last_updated_at.map(|ts| ts.format(format).to_string())
    }

    pub fn series_for(&self, symbol: &str) -> &[HistoricalPoint] {
        self.series.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Holder of the latest [`MarketSnapshot`].
///
/// Each apply call mutates the snapshot in one synchronous step, so readers
/// never observe a half-written field. Clones share the same snapshot.
#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<watch::Sender<MarketSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(MarketSnapshot::default());
        Self {
            inner: Arc::new(tx),
        }
    }

    pub fn snapshot(&self) -> MarketSnapshot {
        self.inner.borrow().clone()
    }

    /// Receiver notified after every apply call.
    pub fn subscribe(&self) -> watch::Receiver<MarketSnapshot> {
        self.inner.subscribe()
    }

    /// Replaces the whole quote map and stamps the update time.
    pub fn apply_quotes(&self, quotes: QuoteMap) {
        self.apply_quotes_at(quotes, Local::now());
    }

    pub(crate) fn apply_quotes_at(&self, quotes: QuoteMap, at: DateTime<Local>) {
        debug!(count = quotes.len(), "Store PUT quotes");
        self.inner.send_modify(|snapshot| {
            snapshot.quotes = Some(quotes);
            snapshot.last_updated_at = Some(at);
        });
    }

    /// Replaces the series of one symbol, leaving every other symbol as is.
    pub fn apply_series(&self, symbol: &str, series: CurrencySeries) {
        debug!(symbol, points = series.len(), "Store PUT series");
        self.inner.send_modify(|snapshot| {
            snapshot.series.insert(symbol.to_string(), series);
        });
    }

    pub fn last_updated_label(&self, format: &str) -> Option<String> {
        self.inner.borrow().last_updated_label(format)
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
