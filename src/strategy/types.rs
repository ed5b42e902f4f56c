use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::types::{OrderType, Side, Tick};
use crate::tracker::StateView;

/// A strategy's request to trade
///
/// Quantities are requests: the risk manager may shrink or reject them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub order_type: OrderType,
    /// Limit price, only used for limit orders
    pub limit_price: Option<Decimal>,
    /// Price used to estimate notional
    pub reference_price: Decimal,
    /// Short tag explaining why the intent exists
    pub rationale: String,
    /// Risk-generated liquidation
    pub forced: bool,
}

impl TradeIntent {
    /// Market order intent
    pub fn market(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        reference_price: Decimal,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            reference_price,
            rationale: rationale.into(),
            forced: false,
        }
    }

    /// Limit order intent at `price`
    pub fn limit(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            order_type: OrderType::Limit,
            limit_price: Some(price),
            ..Self::market(symbol, side, quantity, price, rationale)
        }
    }

    /// Liquidating intent generated by the risk manager
    pub fn forced_close(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        reference_price: Decimal,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            forced: true,
            ..Self::market(symbol, side, quantity, reference_price, rationale)
        }
    }

    /// Estimated notional at the reference price
    pub fn notional(&self) -> Decimal {
        self.quantity * self.reference_price
    }
}

/// Market input handed to a strategy
#[derive(Debug, Clone, PartialEq)]
pub struct MarketState {
    pub tick: Tick,
    /// Number of ticks seen for this symbol since start
    pub sequence: u64,
}

/// Read-only account context provided to strategies
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyContext {
    pub symbol: String,
    /// Signed net position
    pub position: Decimal,
    pub entry_price: Decimal,
    /// Free quote balance not reserved by open orders
    pub available_quote: Decimal,
    /// Configured base order size for this symbol
    pub order_quantity: Decimal,
    pub has_open_orders: bool,
    pub now: DateTime<Utc>,
}

impl StrategyContext {
    pub fn from_view(view: &StateView, symbol: &str, order_quantity: Decimal, now: DateTime<Utc>) -> Self {
        let (position, entry_price) = view
            .position(symbol)
            .map(|p| (p.quantity, p.entry_price))
            .unwrap_or_default();
        Self {
            symbol: symbol.to_string(),
            position,
            entry_price,
            available_quote: view.available_quote(),
            order_quantity,
            has_open_orders: view.has_open_orders(symbol),
            now,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.position > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.position < Decimal::ZERO
    }
}
