use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::util::{coerce_decimal, coerce_timestamp, get_json, get_text, parse_json};
use crate::core::{
    CurrencyQuote, CurrencySeries, FetchError, HistoricalPoint, HistoryFetcher, QuoteFetcher,
    QuoteMap,
};

/// Quotes and daily history from the AwesomeAPI economy endpoints.
pub struct AwesomeApiProvider {
    base_url: String,
    base_currency: String,
    timeout: Duration,
}

impl AwesomeApiProvider {
    pub fn new(base_url: &str, base_currency: &str, timeout: Duration) -> Self {
        AwesomeApiProvider {
            base_url: base_url.trim_end_matches('/').to_string(),
            base_currency: base_currency.to_string(),
            timeout,
        }
    }

    fn pair(&self, symbol: &str) -> String {
        format!("{}-{}", symbol, self.base_currency)
    }

    /// Key the `last` endpoint uses for a symbol, e.g. `USDBRL`.
    fn response_key(&self, symbol: &str) -> String {
        format!("{}{}", symbol, self.base_currency)
    }

    fn parse_quotes(
        &self,
        url: &str,
        symbols: &[String],
        data: &Value,
    ) -> Result<QuoteMap, FetchError> {
        let entries = data
            .as_object()
            .ok_or_else(|| FetchError::format(url, "expected a JSON object of pairs"))?;

        let mut quotes = QuoteMap::new();
        for symbol in symbols {
            let key = self.response_key(symbol);
            let entry = entries
                .get(&key)
                .ok_or_else(|| FetchError::format(url, format!("missing pair {key}")))?;

            let bid = entry.get("bid").and_then(coerce_decimal);
            let change = entry.get("varBid").and_then(coerce_decimal);
            match (bid, change) {
                (Some(bid), Some(change)) => {
                    quotes.insert(symbol.clone(), CurrencyQuote::new(symbol, bid, change));
                }
                _ => warn!(pair = %key, entry = %entry, "Dropping quote with non-numeric fields"),
            }
        }

        if quotes.is_empty() {
            return Err(FetchError::format(url, "no pair carried a numeric quote"));
        }
        Ok(quotes)
    }
}

/// Turns a newest-first daily payload into an oldest-first series.
///
/// Anything other than a list degrades to an empty series. Entries without a
/// usable timestamp or bid are dropped.
pub fn parse_daily_series(data: &Value, window_days: u32) -> CurrencySeries {
    let Some(entries) = data.as_array() else {
        return Vec::new();
    };

    let mut series: CurrencySeries = entries
        .iter()
        .filter_map(|entry| {
            let timestamp = entry.get("timestamp").and_then(coerce_timestamp)?;
            let value = entry.get("bid").and_then(coerce_decimal)?;
            HistoricalPoint::from_unix(timestamp, value)
        })
        .take(window_days as usize)
        .collect();
    series.reverse();
    series
}

#[async_trait]
impl QuoteFetcher for AwesomeApiProvider {
    #[instrument(name = "AwesomeQuoteFetch", skip(self, symbols), fields(count = symbols.len()))]
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<QuoteMap, FetchError> {
        let pairs: Vec<String> = symbols.iter().map(|s| self.pair(s)).collect();
        let url = format!("{}/last/{}", self.base_url, pairs.join(","));
        debug!("Requesting quotes from {}", url);

        let data = get_json(&url, self.timeout).await?;
        self.parse_quotes(&url, symbols, &data)
    }
}

#[async_trait]
impl HistoryFetcher for AwesomeApiProvider {
    #[instrument(name = "AwesomeHistoryFetch", skip(self), fields(symbol = %symbol))]
    async fn fetch_history(
        &self,
        symbol: &str,
        window_days: u32,
    ) -> Result<CurrencySeries, FetchError> {
        let url = format!(
            "{}/daily/{}/{}",
            self.base_url,
            self.pair(symbol),
            window_days
        );
        debug!("Requesting daily history from {}", url);

        let (status, text) = get_text(&url, self.timeout).await?;
        let data = match parse_json(&url, &text) {
            Ok(data) => data,
            Err(_) if !status.is_success() => {
                return Err(FetchError::Upstream { url, status });
            }
            Err(e) => {
                warn!(error = %e, "Unreadable history payload, using an empty series");
                return Ok(Vec::new());
            }
        };

        // Unknown pairs come back as an error object with a 4xx status
        if !status.is_success() {
            warn!(%status, payload = %data, "History request rejected, using an empty series");
        } else if !data.is_array() {
            warn!(payload = %data, "History payload is not a list, using an empty series");
        }
        Ok(parse_daily_series(&data, window_days))
    }
}
