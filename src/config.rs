use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::exchange::{Pair, SUPPORTED_EXCHANGES};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    #[error("Strategy #{index} ({name}): {reason}")]
    Invalid {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("No strategies defined in {0}")]
    Empty(PathBuf),

    #[error("Exchange '{exchange}' is used by a strategy but has no entry in the keys file")]
    MissingKeys { exchange: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyFile {
    #[serde(alias = "strategies")]
    pub strategy: Vec<Strategy>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Strategy {
    /// Maximum spend per asset, per exchange, in `base_asset` units.
    pub amount: Decimal,
    #[serde(alias = "quote_asset")]
    pub base_asset: String,
    pub assets: Vec<String>,
    pub exchanges: Vec<String>,
    /// Label only; recurring runs are driven by an external scheduler.
    #[serde(default)]
    pub period: Option<String>,
}

impl Strategy {
    pub fn pairs(&self) -> Vec<Pair> {
        self.assets
            .iter()
            .map(|asset| Pair::new(asset, &self.base_asset))
            .collect()
    }

    fn normalize(&mut self) {
        self.base_asset = self.base_asset.trim().to_uppercase();
        for asset in &mut self.assets {
            *asset = asset.trim().to_uppercase();
        }
        for exchange in &mut self.exchanges {
            *exchange = exchange.trim().to_lowercase();
        }
    }

    fn check(&self) -> Result<(), String> {
        if self.amount <= Decimal::ZERO {
            return Err(format!("amount must be positive, got {}", self.amount));
        }
        if self.base_asset.is_empty() {
            return Err("base_asset must not be empty".to_string());
        }
        if self.assets.is_empty() {
            return Err("assets must not be empty".to_string());
        }
        if let Some(asset) = self.assets.iter().find(|a| a.is_empty()) {
            return Err(format!("invalid asset symbol '{}'", asset));
        }
        if self.assets.contains(&self.base_asset) {
            return Err(format!(
                "{} is both the base asset and a target asset",
                self.base_asset
            ));
        }
        if self.exchanges.is_empty() {
            return Err("exchanges must not be empty".to_string());
        }
        if let Some(unknown) = self
            .exchanges
            .iter()
            .find(|e| !SUPPORTED_EXCHANGES.contains(&e.as_str()))
        {
            return Err(format!(
                "unsupported exchange '{}' (supported: {})",
                unknown,
                SUPPORTED_EXCHANGES.join(", ")
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "strategy-{}-{}",
            self.period.as_deref().unwrap_or("once"),
            self.amount
        )
    }
}

impl StrategyFile {
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut file: StrategyFile = read_yaml(path)?;

        if file.strategy.is_empty() {
            return Err(ConfigError::Empty(path.to_path_buf()));
        }
        for strategy in &mut file.strategy {
            strategy.normalize();
        }

        Ok(file)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (index, strategy) in self.strategy.iter().enumerate() {
            strategy.check().map_err(|reason| ConfigError::Invalid {
                index,
                name: strategy.to_string(),
                reason,
            })?;
        }
        Ok(())
    }

    pub fn check_keys(&self, keys: &KeyStore) -> Result<(), ConfigError> {
        for exchange in self.exchange_ids() {
            keys.credentials(&exchange)?;
        }
        Ok(())
    }

    /// Distinct exchange ids across all strategies, in first-seen order.
    pub fn exchange_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.strategy
            .iter()
            .flat_map(|s| s.exchanges.iter())
            .filter(|e| seen.insert(e.as_str()))
            .cloned()
            .collect()
    }
}

#[derive(Deserialize)]
pub struct ExchangeCredentials {
    #[serde(rename = "apiKey", alias = "apikey", alias = "api_key")]
    pub api_key: SecretString,
    pub secret: SecretString,
}

impl ExchangeCredentials {
    pub fn new(api_key: &str, secret: &str) -> Self {
        Self {
            api_key: SecretString::new(api_key.to_string()),
            secret: SecretString::new(secret.to_string()),
        }
    }

    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    pub fn secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl Clone for ExchangeCredentials {
    fn clone(&self) -> Self {
        Self::new(self.api_key(), self.secret())
    }
}

impl fmt::Debug for ExchangeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeCredentials")
            .field("api_key", &"[REDACTED]")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeyStore {
    keys: HashMap<String, ExchangeCredentials>,
}

impl KeyStore {
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw: HashMap<String, ExchangeCredentials> = read_yaml(path.as_ref())?;
        Ok(raw.into_iter().collect())
    }

    pub fn insert(&mut self, exchange: &str, credentials: ExchangeCredentials) {
        self.keys.insert(exchange.trim().to_lowercase(), credentials);
    }

    pub fn credentials(&self, exchange: &str) -> Result<&ExchangeCredentials, ConfigError> {
        self.keys
            .get(exchange)
            .ok_or_else(|| ConfigError::MissingKeys {
                exchange: exchange.to_string(),
            })
    }
}

impl FromIterator<(String, ExchangeCredentials)> for KeyStore {
    fn from_iter<I: IntoIterator<Item = (String, ExchangeCredentials)>>(iter: I) -> Self {
        let mut store = KeyStore::default();
        for (exchange, credentials) in iter {
            store.insert(&exchange, credentials);
        }
        store
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Sandbox,
    Live,
}

impl Environment {
    pub fn from_test_flag(test: bool) -> Self {
        if test {
            Environment::Sandbox
        } else {
            Environment::Live
        }
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let parse_error = |source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    };

    config::Config::builder()
        .add_source(config::File::from(path).format(config::FileFormat::Yaml))
        .build()
        .map_err(parse_error)?
        .try_deserialize()
        .map_err(parse_error)
}
