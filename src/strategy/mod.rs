//! Strategy module for trade decision making
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PER-SYMBOL PIPELINE                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Tick / Gap arrives                                         │
//! │       │                                                     │
//! │       ▼                                                     │
//! │  SignalEngine                                               │
//! │    - tracks gaps and tick freshness                         │
//! │    - Strategy.evaluate() → Vec<TradeIntent>                 │
//! │       │                                                     │
//! │       ▼                                                     │
//! │  RiskManager.evaluate() → Approved(SizedIntent) / Rejected  │
//! │       │                                                     │
//! │       ▼                                                     │
//! │  ExecutionEngine.execute()                                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`Strategy`]: Trait for implementing trading strategies
//! - [`TradeIntent`]: What a strategy wants to trade, before sizing
//! - [`StrategyContext`]: Read-only account state provided to strategies
//! - [`SignalEngine`]: Wraps one strategy for one symbol
//! - [`MacdMomentum`]: Bar-based MACD momentum strategy

mod engine;
mod macd;
mod traits;
mod types;

pub use engine::SignalEngine;
pub use macd::MacdMomentum;
pub use traits::{BoxedStrategy, Strategy};
pub use types::{MarketState, StrategyContext, TradeIntent};

use crate::common::errors::{ClientError, Result};
use crate::config::types::StrategyConfig;

/// Instantiate the configured strategy
pub fn build_strategy(config: &StrategyConfig) -> Result<BoxedStrategy> {
    match config.kind.as_str() {
        "macd" | "macd_momentum" => Ok(Box::new(MacdMomentum::new(config))),
        other => Err(ClientError::Configuration(format!(
            "unknown strategy kind: {}",
            other
        ))),
    }
}
