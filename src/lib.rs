//! BingX Trader Library
//!
//! An automated trading engine for BingX perpetual swaps: streaming market
//! data, pluggable strategies, a pre-trade risk gate and idempotent order
//! execution reconciled against the exchange.

pub mod bingx;
pub mod common;
pub mod config;
pub mod coordinator;
pub mod execution;
pub mod market;
pub mod risk;
pub mod strategy;
pub mod tracker;

// Re-export commonly used types
pub use bingx::{BingxMarketStream, BingxRestClient};
pub use common::errors::{ClientError, Result};
pub use common::traits::{ExchangeApi, MarketStream};
pub use common::types::{MarketEvent, OrderStatus, OrderType, PriceLevel, Side, Tick};
pub use config::types::AppConfig;
pub use coordinator::Coordinator;

// Trading components
pub use execution::{ExecutionEngine, ExecutionError, Order, OrderEvent};
pub use risk::{RiskDecision, RiskManager, SizedIntent};
pub use strategy::{BoxedStrategy, SignalEngine, Strategy, StrategyContext, TradeIntent};
pub use tracker::{PositionTracker, StateView};
