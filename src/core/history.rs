//! Daily history types and the fetcher seam

use async_trait::async_trait;
use chrono::{Local, NaiveDate, TimeZone};
use rust_decimal::Decimal;

use super::error::FetchError;

pub const DEFAULT_WINDOW_DAYS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoricalPoint {
    pub date: NaiveDate,
    pub value: Decimal,
}

impl HistoricalPoint {
    /// Builds a point from unix seconds, dated in the local timezone.
    pub fn from_unix(timestamp: i64, value: Decimal) -> Option<Self> {
        let date = Local.timestamp_opt(timestamp, 0).single()?.date_naive();
        Some(HistoricalPoint { date, value })
    }

    /// Short `dd/mm` axis label.
    pub fn label(&self) -> String {
        self.date.format("%d/%m").to_string()
    }
}

/// Oldest-first points for one symbol.
pub type CurrencySeries = Vec<HistoricalPoint>;

#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    /// Trailing daily series, ascending by date and at most `window_days` long.
    ///
    /// A payload that is not a list degrades to an empty series; only
    /// transport and status failures come back as `Err`.
    async fn fetch_history(
        &self,
        symbol: &str,
        window_days: u32,
    ) -> Result<CurrencySeries, FetchError>;
}
