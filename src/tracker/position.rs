//! Net position accounting per symbol

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::types::{ExchangePosition, Side};

/// Effect of one fill on a position
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillEffect {
    /// Quantity that reduced the existing position
    pub closed_quantity: Decimal,
    /// Quantity that opened or extended the position
    pub opened_quantity: Decimal,
    /// P&L realized on the closed quantity
    pub realized_pnl: Decimal,
    /// Entry notional of the closed quantity (margin given back)
    pub released_notional: Decimal,
    /// Notional of the opened quantity (margin taken)
    pub opened_notional: Decimal,
}

/// Signed net position in one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Positive = long, negative = short
    pub quantity: Decimal,
    /// Weighted average entry price, zero when flat
    pub entry_price: Decimal,
    /// Latest market price, if any tick has been seen
    pub mark_price: Option<Decimal>,
    pub realized_pnl: Decimal,
}

impl Position {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            mark_price: None,
            realized_pnl: Decimal::ZERO,
        }
    }

    pub fn from_exchange(remote: &ExchangePosition) -> Self {
        Self {
            symbol: remote.symbol.clone(),
            quantity: remote.quantity,
            entry_price: if remote.quantity.is_zero() {
                Decimal::ZERO
            } else {
                remote.entry_price
            },
            mark_price: None,
            realized_pnl: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Apply a fill of `quantity` at `price`
    ///
    /// Extending uses the weighted average of old and new entry. Reducing
    /// keeps the entry and realizes P&L. Crossing through zero restarts the
    /// entry at the fill price; closing exactly to zero clears it.
    pub fn apply_fill(&mut self, side: Side, quantity: Decimal, price: Decimal) -> FillEffect {
        let mut effect = FillEffect::default();
        if quantity <= Decimal::ZERO {
            return effect;
        }

        let signed = side.sign() * quantity;
        let same_direction = self.quantity.is_zero() || self.quantity.is_sign_positive() == signed.is_sign_positive();

        if same_direction {
            let held = self.quantity.abs();
            self.entry_price = (held * self.entry_price + quantity * price) / (held + quantity);
            self.quantity += signed;
            effect.opened_quantity = quantity;
            effect.opened_notional = quantity * price;
            return effect;
        }

        let held = self.quantity.abs();
        let closed = quantity.min(held);
        let direction = if self.quantity > Decimal::ZERO {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        };
        effect.closed_quantity = closed;
        effect.realized_pnl = (price - self.entry_price) * closed * direction;
        effect.released_notional = closed * self.entry_price;
        self.realized_pnl += effect.realized_pnl;
        self.quantity += signed;

        if self.quantity.is_zero() {
            self.entry_price = Decimal::ZERO;
        } else if quantity > held {
            let opened = quantity - held;
            self.entry_price = price;
            effect.opened_quantity = opened;
            effect.opened_notional = opened * price;
        }
        effect
    }

    /// Mark price, falling back to the entry price
    pub fn valuation_price(&self) -> Decimal {
        self.mark_price.unwrap_or(self.entry_price)
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        match self.mark_price {
            Some(mark) if !self.is_flat() => (mark - self.entry_price) * self.quantity,
            _ => Decimal::ZERO,
        }
    }

    /// Unrealized P&L as a percentage of the entry price, from the holder's side
    pub fn unrealized_pnl_pct(&self) -> Option<Decimal> {
        let mark = self.mark_price?;
        if self.is_flat() || self.entry_price.is_zero() {
            return None;
        }
        let direction = if self.quantity > Decimal::ZERO {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        };
        Some((mark - self.entry_price) / self.entry_price * Decimal::ONE_HUNDRED * direction)
    }

    /// Absolute marked notional
    pub fn notional(&self) -> Decimal {
        self.quantity.abs() * self.valuation_price()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_weighted_average_entry() {
        let mut position = Position::new("BTC-USDT");
        position.apply_fill(Side::Buy, dec!(1), dec!(100));
        position.apply_fill(Side::Buy, dec!(3), dec!(120));
        assert_eq!(position.quantity, dec!(4));
        assert_eq!(position.entry_price, dec!(115));
    }

    #[test]
    fn test_reduce_keeps_entry_and_realizes() {
        let mut position = Position::new("BTC-USDT");
        position.apply_fill(Side::Buy, dec!(2), dec!(100));
        let effect = position.apply_fill(Side::Sell, dec!(0.5), dec!(110));
        assert_eq!(position.quantity, dec!(1.5));
        assert_eq!(position.entry_price, dec!(100));
        assert_eq!(effect.realized_pnl, dec!(5));
        assert_eq!(effect.released_notional, dec!(50));
    }

    #[test]
    fn test_crossing_zero_resets_entry() {
        let mut position = Position::new("ETH-USDT");
        position.apply_fill(Side::Buy, dec!(1), dec!(100));
        let effect = position.apply_fill(Side::Sell, dec!(3), dec!(90));
        assert_eq!(position.quantity, dec!(-2));
        assert_eq!(position.entry_price, dec!(90));
        assert_eq!(effect.closed_quantity, dec!(1));
        assert_eq!(effect.opened_quantity, dec!(2));
        assert_eq!(effect.realized_pnl, dec!(-10));
    }

    #[test]
    fn test_close_to_zero_clears_entry() {
        let mut position = Position::new("ETH-USDT");
        position.apply_fill(Side::Sell, dec!(1), dec!(100));
        position.apply_fill(Side::Buy, dec!(1), dec!(80));
        assert!(position.is_flat());
        assert_eq!(position.entry_price, Decimal::ZERO);
        assert_eq!(position.realized_pnl, dec!(20));
    }

    #[test]
    fn test_short_pnl_pct() {
        let mut position = Position::new("ETH-USDT");
        position.apply_fill(Side::Sell, dec!(1), dec!(100));
        position.mark_price = Some(dec!(106));
        assert_eq!(position.unrealized_pnl_pct(), Some(dec!(-6)));
        assert_eq!(position.unrealized_pnl(), dec!(-6));
    }

    fn fills() -> impl Strategy<Value = Vec<(bool, u32, u32)>> {
        prop::collection::vec((any::<bool>(), 1u32..1_000, 1u32..100_000), 1..40)
    }

    proptest! {
        #[test]
        fn prop_quantity_is_signed_sum_of_fills(fills in fills()) {
            let mut position = Position::new("BTC-USDT");
            let mut expected = Decimal::ZERO;
            for (buy, qty, price) in fills {
                let side = if buy { Side::Buy } else { Side::Sell };
                let qty = Decimal::new(qty as i64, 3);
                position.apply_fill(side, qty, Decimal::new(price as i64, 2));
                expected += side.sign() * qty;
            }
            prop_assert_eq!(position.quantity, expected);
            prop_assert_eq!(position.is_flat(), position.entry_price.is_zero());
        }

        #[test]
        fn prop_same_side_fills_average_by_formula(fills in prop::collection::vec((1u32..1_000, 1u32..100_000), 1..20)) {
            let mut position = Position::new("BTC-USDT");
            let mut notional = Decimal::ZERO;
            let mut total = Decimal::ZERO;
            for (qty, price) in fills {
                let qty = Decimal::new(qty as i64, 3);
                let price = Decimal::new(price as i64, 2);
                position.apply_fill(Side::Buy, qty, price);
                notional += qty * price;
                total += qty;
            }
            let expected = notional / total;
            prop_assert!((position.entry_price - expected).abs() < dec!(0.000001));
        }
    }
}
