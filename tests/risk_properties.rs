//! Property tests for the pre-trade risk gate
//!
//! To run these tests:
//! ```
//! cargo test --test risk_properties
//! ```

mod common;

use bingx_trader::common::types::{Balance, Side};
use bingx_trader::risk::{FeeSchedule, RiskDecision, RiskLimits, RiskManager};
use bingx_trader::strategy::TradeIntent;
use bingx_trader::tracker::Position;
use bingx_trader::StateView;
use chrono::Utc;
use common::{app_config, SYMBOL};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::HashMap;

fn manager() -> RiskManager {
    let config = app_config();
    RiskManager::new(
        RiskLimits::from_config(&config),
        FeeSchedule::from_config(&config.risk),
    )
}

fn state(free: Decimal, position: Decimal, entry: Decimal) -> StateView {
    let mut balances = HashMap::new();
    balances.insert("USDT".to_string(), Balance::new("USDT", free, Decimal::ZERO));
    let mut held = Position::new(SYMBOL);
    held.quantity = position;
    held.entry_price = entry;
    held.mark_price = Some(entry);
    let mut positions = HashMap::new();
    positions.insert(SYMBOL.to_string(), held);
    StateView {
        quote_asset: "USDT".to_string(),
        balances,
        positions,
        snapshot_at: Some(Utc::now()),
        ..StateView::default()
    }
}

/// Decimal with `scale` places from an integer strategy
fn decimal(range: std::ops::Range<i64>, scale: u32) -> impl Strategy<Value = Decimal> {
    range.prop_map(move |n| Decimal::new(n, scale))
}

proptest! {
    #[test]
    fn approved_opening_never_exceeds_available_balance(
        free in decimal(0..500_000, 2),
        position in decimal(-500..500, 4),
        price in decimal(1_000_000..9_000_000, 2),
        quantity in decimal(1..1_000, 4),
        buy in any::<bool>(),
    ) {
        let view = state(free, position, price);
        let side = if buy { Side::Buy } else { Side::Sell };
        let intent = TradeIntent::market(SYMBOL, side, quantity, price, "prop");

        if let RiskDecision::Approved(sized) = manager().evaluate(&view, &intent, Utc::now()) {
            let opening = sized.quantity - sized.reducing_quantity;
            prop_assert!(opening * price <= view.available_quote());
            prop_assert!(sized.quantity <= quantity);
        }
    }

    #[test]
    fn approved_orders_respect_position_limit(
        position in decimal(-500..500, 4),
        quantity in decimal(1..1_000, 4),
        buy in any::<bool>(),
    ) {
        let view = state(Decimal::new(1_000_000, 0), position, Decimal::new(50_000, 0));
        let side = if buy { Side::Buy } else { Side::Sell };
        let intent = TradeIntent::market(SYMBOL, side, quantity, Decimal::new(50_000, 0), "prop");
        let max = app_config().symbols[0].max_position_qty;

        if let RiskDecision::Approved(sized) = manager().evaluate(&view, &intent, Utc::now()) {
            let after = position + side.sign() * sized.quantity;
            // an order may only leave the position beyond the limit if it shrinks it
            prop_assert!(after.abs() <= max || after.abs() < position.abs());
        }
    }
}
