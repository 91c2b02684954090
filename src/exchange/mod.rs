mod binance;
mod kraken;
mod models;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Environment, KeyStore};

pub use binance::BinanceClient;
pub use kraken::KrakenClient;
pub use models::*;

pub const SUPPORTED_EXCHANGES: &[&str] = &["binance", "kraken"];

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Unknown exchange '{0}'")]
    UnknownExchange(String),

    #[error("{0} has no sandbox environment; refusing to run in test mode")]
    SandboxUnsupported(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Exchange API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse exchange response: {0}")]
    Parse(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Order too small: {0}")]
    OrderTooSmall(String),

    #[error("{exchange} is unavailable: {reason}")]
    Unavailable { exchange: String, reason: String },
}

/// A trading pair: `asset` is bought, `base` is spent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pair {
    pub asset: String,
    pub base: String,
}

impl Pair {
    pub fn new(asset: &str, base: &str) -> Self {
        Self {
            asset: asset.to_uppercase(),
            base: base.to_uppercase(),
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.asset, self.base)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderReceipt {
    pub order_id: String,
    pub pair: Pair,
    /// Amount of `pair.base` spent, as reported by the venue when available.
    pub spend: Decimal,
    pub status: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Exchange: Send + Sync {
    fn id(&self) -> &'static str;

    fn environment(&self) -> Environment;

    /// Free (unlocked) balance of `asset`; zero when the account holds none.
    async fn free_balance(&self, asset: &str) -> Result<Decimal, ExchangeError>;

    /// Market buy of `pair.asset`, spending `spend` units of `pair.base`.
    async fn market_buy(&self, pair: &Pair, spend: Decimal)
        -> Result<OrderReceipt, ExchangeError>;
}

pub fn connect(
    id: &str,
    credentials: &crate::config::ExchangeCredentials,
    environment: Environment,
) -> Result<Box<dyn Exchange>, ExchangeError> {
    match id {
        "binance" => Ok(Box::new(BinanceClient::new(
            credentials.clone(),
            environment,
        )?)),
        "kraken" => Ok(Box::new(KrakenClient::new(
            credentials.clone(),
            environment,
        )?)),
        other => Err(ExchangeError::UnknownExchange(other.to_string())),
    }
}

/// Connected clients keyed by exchange id. Exchanges that failed to connect
/// are kept with their error so callers can report them per strategy.
#[derive(Default)]
pub struct ExchangeSet {
    clients: HashMap<String, Box<dyn Exchange>>,
    unavailable: HashMap<String, ExchangeError>,
}

impl ExchangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_all(ids: &[String], keys: &KeyStore, environment: Environment) -> Self {
        let mut set = Self::new();

        for id in ids {
            let result = keys
                .credentials(id)
                .map_err(|e| ExchangeError::InvalidCredentials(e.to_string()))
                .and_then(|credentials| connect(id, credentials, environment));

            match result {
                Ok(client) => {
                    if client.environment() != environment {
                        warn!(
                            "{} runs in {:?} although {:?} was requested",
                            id,
                            client.environment(),
                            environment
                        );
                    }
                    info!("Connected to {} ({:?})", id, client.environment());
                    set.insert(client);
                }
                Err(e) => {
                    warn!("Exchange {} unavailable: {}", id, e);
                    set.mark_unavailable(id, e);
                }
            }
        }

        set
    }

    pub fn insert(&mut self, client: Box<dyn Exchange>) {
        let id = client.id().to_string();
        self.unavailable.remove(&id);
        self.clients.insert(id, client);
    }

    pub fn mark_unavailable(&mut self, id: &str, error: ExchangeError) {
        self.clients.remove(id);
        self.unavailable.insert(id.to_string(), error);
    }

    pub fn get(&self, id: &str) -> Result<&dyn Exchange, ExchangeError> {
        if let Some(client) = self.clients.get(id) {
            return Ok(client.as_ref());
        }
        match self.unavailable.get(id) {
            Some(e) => Err(ExchangeError::Unavailable {
                exchange: id.to_string(),
                reason: e.to_string(),
            }),
            None => Err(ExchangeError::UnknownExchange(id.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
