//! Instantaneous quote types and the fetcher seam

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt::Display;

use super::error::FetchError;

/// Latest quote for one symbol against the base currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyQuote {
    pub symbol: String,
    pub bid: Decimal,
    pub change_percent: Decimal,
}

impl CurrencyQuote {
    pub fn new(symbol: &str, bid: Decimal, change_percent: Decimal) -> Self {
        CurrencyQuote {
            symbol: symbol.to_string(),
            bid,
            change_percent,
        }
    }

    pub fn polarity(&self) -> Polarity {
        Polarity::of(self.change_percent)
    }
}

/// Display direction of a change. Zero counts as a gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Gain,
    Loss,
}

impl Polarity {
    pub fn of(change: Decimal) -> Self {
        if change.is_sign_negative() && !change.is_zero() {
            Polarity::Loss
        } else {
            Polarity::Gain
        }
    }
}

impl Display for Polarity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Polarity::Gain => "▲",
                Polarity::Loss => "▼",
            }
        )
    }
}

/// Quotes keyed by bare symbol (`USD`, not `USDBRL`).
pub type QuoteMap = BTreeMap<String, CurrencyQuote>;

#[async_trait]
pub trait QuoteFetcher: Send + Sync {
    /// One batched call for every symbol against the base currency.
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<QuoteMap, FetchError>;
}
