use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use crate::core::FetchError;

/// Coerces a JSON string or number into a decimal.
///
/// Strings are trimmed and may use plain or scientific notation. Anything
/// else, including an empty string, yields `None`.
pub fn coerce_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_decimal(s),
        Value::Number(n) => parse_decimal(&n.to_string()),
        _ => None,
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// Coerces a JSON integer or integer string into unix seconds.
pub fn coerce_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Issues a GET and returns the status with the raw body, whatever the status.
pub async fn get_text(url: &str, timeout: Duration) -> Result<(StatusCode, String), FetchError> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("fxwatch/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|e| FetchError::transport(url, e))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::transport(url, e))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| FetchError::transport(url, e))?;
    Ok((status, text))
}

pub fn parse_json(url: &str, text: &str) -> Result<Value, FetchError> {
    serde_json::from_str(text)
        .map_err(|e| FetchError::format(url, format!("Failed to parse JSON response: {e}")))
}

/// Issues a GET and returns the parsed JSON body.
///
/// Non-success statuses and bodies that are not JSON are errors; the shape of
/// the JSON is left to the caller.
pub async fn get_json(url: &str, timeout: Duration) -> Result<Value, FetchError> {
    let (status, text) = get_text(url, timeout).await?;
    if !status.is_success() {
        return Err(FetchError::Upstream {
            url: url.to_string(),
            status,
        });
    }
    parse_json(url, &text)
}
