//! Configured risk limits, resolved per symbol

use chrono::Duration;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;

use crate::config::types::{AppConfig, SymbolConfig};

/// Per-symbol sizing constraints
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolLimits {
    pub max_position_qty: Decimal,
    pub qty_precision: u32,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
}

impl SymbolLimits {
    /// Round a quantity down to the exchange step
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        quantity.round_dp_with_strategy(self.qty_precision, RoundingStrategy::ToZero)
    }
}

impl From<&SymbolConfig> for SymbolLimits {
    fn from(config: &SymbolConfig) -> Self {
        Self {
            max_position_qty: config.max_position_qty,
            qty_precision: config.qty_precision,
            min_qty: config.min_qty,
            min_notional: config.min_notional,
        }
    }
}

/// Account-wide limits
#[derive(Debug, Clone, PartialEq)]
pub struct RiskLimits {
    pub symbols: HashMap<String, SymbolLimits>,
    /// Snapshots older than this reject every intent
    pub max_snapshot_age: Duration,
    /// Marked exposure plus pending notional may not exceed equity times this
    pub max_exposure_ratio: Decimal,
    /// Extra fraction of notional kept free on top of fees
    pub fee_buffer_ratio: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
}

impl RiskLimits {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            symbols: config
                .symbols
                .iter()
                .map(|s| (s.symbol.clone(), SymbolLimits::from(s)))
                .collect(),
            max_snapshot_age: Duration::seconds(config.risk.snapshot_staleness_seconds as i64),
            max_exposure_ratio: config.risk.max_exposure_ratio,
            fee_buffer_ratio: config.risk.fee_buffer_ratio,
            stop_loss_pct: config.risk.stop_loss_pct,
            take_profit_pct: config.risk.take_profit_pct,
        }
    }

    pub fn symbol(&self, symbol: &str) -> Option<&SymbolLimits> {
        self.symbols.get(symbol)
    }
}
