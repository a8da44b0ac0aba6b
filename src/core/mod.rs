//! Core market-data abstractions

pub mod config;
pub mod error;
pub mod history;
pub mod log;
pub mod quote;
pub mod scheduler;
pub mod snapshot;

// Re-export main types for cleaner imports
pub use error::FetchError;
pub use history::{CurrencySeries, HistoricalPoint, HistoryFetcher};
pub use quote::{CurrencyQuote, Polarity, QuoteFetcher, QuoteMap};
pub use scheduler::{CycleOutcome, CycleReport, RefreshScheduler};
pub use snapshot::{MarketSnapshot, SnapshotStore};
