use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const DEFAULT_BASE_CURRENCY: &str = "BRL";
pub const DEFAULT_SYMBOLS: [&str; 7] = ["USD", "EUR", "BTC", "GBP", "JPY", "CAD", "ETH"];
pub const DEFAULT_AWESOME_API_URL: &str = "https://economia.awesomeapi.com.br/json";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AwesomeApiProviderConfig {
    pub base_url: String,
}

impl Default for AwesomeApiProviderConfig {
    fn default() -> Self {
        AwesomeApiProviderConfig {
            base_url: DEFAULT_AWESOME_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub awesome_api: AwesomeApiProviderConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub base_currency: String,
    pub symbols: Vec<String>,
    pub refresh_interval_secs: u64,
    pub history_window_days: u32,
    pub request_timeout_secs: u64,
    pub providers: ProvidersConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            base_currency: DEFAULT_BASE_CURRENCY.to_string(),
            symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
            refresh_interval_secs: 30,
            history_window_days: crate::core::history::DEFAULT_WINDOW_DAYS,
            request_timeout_secs: 10,
            providers: ProvidersConfig::default(),
        }
    }
}

fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        if !config_path.exists() {
            debug!("No config at {}, using defaults", config_path.display());
            return Self::default().validate();
        }
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "fxwatch", "fxwatch")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        config.validate()
    }

    /// Normalises codes to upper case and rejects settings the engine cannot run with.
    pub fn validate(mut self) -> Result<Self> {
        self.base_currency = self.base_currency.trim().to_uppercase();
        if !is_currency_code(&self.base_currency) {
            bail!("Invalid base currency: {:?}", self.base_currency);
        }

        if self.symbols.is_empty() {
            bail!("At least one symbol must be configured");
        }
        let mut seen = HashSet::new();
        for symbol in self.symbols.iter_mut() {
            *symbol = symbol.trim().to_uppercase();
            if !is_currency_code(symbol) {
                bail!("Invalid symbol: {symbol:?}");
            }
            if !seen.insert(symbol.clone()) {
                bail!("Duplicate symbol: {symbol}");
            }
        }

        if self.refresh_interval_secs == 0 {
            bail!("refresh_interval_secs must be greater than zero");
        }
        if self.history_window_days == 0 {
            bail!("history_window_days must be greater than zero");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        Ok(self)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
