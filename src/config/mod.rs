//! Configuration: TOML/env settings and the credentials file

pub mod credentials;
pub mod loader;
pub mod types;

pub use credentials::Credentials;
pub use loader::{load_config, load_from_str};
pub use types::{AppConfig, AppSettings, ExchangeConfig, RiskConfig, StrategyConfig, SymbolConfig};
