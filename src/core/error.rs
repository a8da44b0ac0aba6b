//! Errors raised at the upstream fetch boundary

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Connect failure, timeout or a broken body read.
    #[error("Request error: {source} for URL: {url}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP error: {status} for URL: {url}")]
    Upstream { url: String, status: StatusCode },
    /// The response arrived but is not shaped the way we expect.
    #[error("Unexpected payload from {url}: {reason}")]
    UpstreamFormat { url: String, reason: String },
}

impl FetchError {
    pub fn transport(url: &str, source: reqwest::Error) -> Self {
        FetchError::Transport {
            url: url.to_string(),
            source,
        }
    }

    pub fn format<T: Into<String>>(url: &str, reason: T) -> Self {
        FetchError::UpstreamFormat {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_transport(&self) -> bool {
        matches!(self, FetchError::Transport { .. })
    }
}
