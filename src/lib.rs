pub mod config;
pub mod dca;
pub mod exchange;
pub mod hooks;

pub use config::{Environment, ExchangeCredentials, KeyStore, Strategy, StrategyFile};
pub use dca::{DcaEngine, RunReport};
