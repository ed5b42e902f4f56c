use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::common::types::{OrderType, Side};
use crate::config::types::RiskConfig;

/// Fee configuration for the venue
#[derive(Debug, Clone, PartialEq)]
pub struct FeeSchedule {
    /// Maker fee (providing liquidity) as a fraction of notional
    pub maker_rate: Decimal,
    /// Taker fee (taking liquidity) as a fraction of notional
    pub taker_rate: Decimal,
}

impl FeeSchedule {
    pub fn new(maker_rate: Decimal, taker_rate: Decimal) -> Self {
        Self {
            maker_rate,
            taker_rate,
        }
    }

    /// BingX perpetual swap standard tier
    /// - 0.02% maker
    /// - 0.05% taker
    pub fn bingx_standard() -> Self {
        Self::new(dec!(0.0002), dec!(0.0005))
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        Self::new(config.maker_fee_rate, config.taker_fee_rate)
    }

    /// Worst-case rate for an order type (market orders always take)
    pub fn rate(&self, order_type: OrderType) -> Decimal {
        match order_type {
            OrderType::Market => self.taker_rate,
            OrderType::Limit => self.maker_rate.max(self.taker_rate),
        }
    }

    /// Fee on `notional`
    pub fn fee(&self, notional: Decimal, order_type: OrderType) -> Decimal {
        notional * self.rate(order_type)
    }

    /// Cash needed to enter, or received on entry, including fees
    ///
    /// For buying: price paid plus fees
    /// For selling: proceeds minus fees
    pub fn entry_cost(&self, price: Decimal, side: Side, size: Decimal, order_type: OrderType) -> Decimal {
        let base = price * size;
        let fee = self.fee(base, order_type);
        match side {
            Side::Buy => base + fee,
            Side::Sell => base - fee,
        }
    }

    /// Round-trip fee as a percentage of entry notional (taker both ways)
    pub fn round_trip_pct(&self) -> Decimal {
        self.taker_rate * dec!(2) * Decimal::ONE_HUNDRED
    }

    /// Net profit of entering at `entry` and exiting at `exit` with market orders
    pub fn net_profit(&self, entry: Decimal, exit: Decimal, side: Side, size: Decimal) -> Decimal {
        let entry_fee = self.fee(entry * size, OrderType::Market);
        let exit_fee = self.fee(exit * size, OrderType::Market);
        let gross = match side {
            Side::Buy => (exit - entry) * size,
            Side::Sell => (entry - exit) * size,
        };
        gross - entry_fee - exit_fee
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::bingx_standard()
    }
}
