//! Order lifecycle state machine and fills

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::errors::ClientError;
use crate::common::types::{ExchangeOrder, OrderRequest, OrderStatus, OrderType, Side};
use crate::risk::SizedIntent;

/// Errors raised by the execution engine
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Invalid transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Overfill on {key}: {filled} filled + {delta} > {quantity}")]
    Overfill {
        key: String,
        filled: Decimal,
        delta: Decimal,
        quantity: Decimal,
    },

    /// Submission outcome could not be determined; reconciliation was requested
    #[error("Submission outcome of {key} unknown: {reason}")]
    Discrepancy { key: String, reason: String },

    #[error("Unknown order: {0}")]
    UnknownOrder(String),

    #[error("Order {0} has not been acknowledged by the exchange")]
    NotSubmitted(String),

    #[error("Idempotency key {0} was already issued")]
    DuplicateKey(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// One execution against an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_key: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Whether `from -> to` is a legal lifecycle step
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Submitted)
            | (Pending, Rejected)
            | (Submitted, PartiallyFilled)
            | (Submitted, Filled)
            | (Submitted, Cancelled)
            | (Submitted, Rejected)
            | (Submitted, Expired)
            | (PartiallyFilled, PartiallyFilled)
            | (PartiallyFilled, Filled)
            | (PartiallyFilled, Cancelled)
    )
}

/// An order owned by the execution engine until it is terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Idempotency key, sent as the exchange client order id
    pub key: String,
    pub exchange_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    /// Price used to estimate notional while the order is unfilled
    pub reference_price: Decimal,
    /// Only reduces an existing position (risk-forced exits)
    pub reducing: bool,
    pub status: OrderStatus,
    pub fills: Vec<Fill>,
    pub rationale: String,
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn from_intent(key: impl Into<String>, sized: &SizedIntent, now: DateTime<Utc>) -> Self {
        let intent = &sized.intent;
        Self {
            key: key.into(),
            exchange_order_id: None,
            symbol: intent.symbol.clone(),
            side: intent.side,
            order_type: intent.order_type,
            quantity: sized.quantity,
            price: match intent.order_type {
                OrderType::Limit => intent.limit_price,
                OrderType::Market => None,
            },
            reference_price: intent.reference_price,
            reducing: intent.forced || (sized.quantity > Decimal::ZERO && sized.reducing_quantity >= sized.quantity),
            status: OrderStatus::Pending,
            fills: Vec::new(),
            rationale: intent.rationale.clone(),
            reject_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mirror an order found on the exchange that this process did not place
    ///
    /// Quantity already executed is recorded as one opening fill so that later
    /// updates only yield the increments; the snapshot's positions already
    /// include it.
    pub fn from_exchange(key: impl Into<String>, remote: &ExchangeOrder) -> Self {
        let key = key.into();
        let fills = if remote.executed_quantity > Decimal::ZERO {
            vec![Fill {
                order_key: key.clone(),
                quantity: remote.executed_quantity,
                price: remote.average_price,
                fee: remote.commission,
                timestamp: remote.updated_at,
            }]
        } else {
            Vec::new()
        };
        let status = match remote.status {
            OrderStatus::Submitted if !fills.is_empty() => OrderStatus::PartiallyFilled,
            OrderStatus::Pending => OrderStatus::Submitted,
            status => status,
        };
        Self {
            key,
            exchange_order_id: Some(remote.exchange_order_id.clone()),
            symbol: remote.symbol.clone(),
            side: remote.side,
            order_type: remote.order_type,
            quantity: remote.quantity,
            price: remote.price,
            reference_price: remote.price.unwrap_or(remote.average_price),
            reducing: false,
            status,
            fills,
            rationale: "external".to_string(),
            reject_reason: None,
            created_at: remote.updated_at,
            updated_at: remote.updated_at,
        }
    }

    pub fn to_request(&self) -> OrderRequest {
        OrderRequest {
            client_order_id: self.key.clone(),
            symbol: self.symbol.clone(),
            side: self.side,
            order_type: self.order_type,
            quantity: self.quantity,
            price: self.price,
        }
    }

    pub fn filled_quantity(&self) -> Decimal {
        self.fills.iter().map(|f| f.quantity).sum()
    }

    pub fn remaining_quantity(&self) -> Decimal {
        (self.quantity - self.filled_quantity()).max(Decimal::ZERO)
    }

    pub fn total_fees(&self) -> Decimal {
        self.fills.iter().map(|f| f.fee).sum()
    }

    /// Volume-weighted price over all fills, zero when unfilled
    pub fn average_fill_price(&self) -> Decimal {
        let filled = self.filled_quantity();
        if filled.is_zero() {
            return Decimal::ZERO;
        }
        self.fills.iter().map(|f| f.quantity * f.price).sum::<Decimal>() / filled
    }

    /// Estimated notional still to be executed
    pub fn remaining_notional(&self) -> Decimal {
        self.remaining_quantity() * self.price.unwrap_or(self.reference_price)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `to`. Re-entering the current status is a no-op.
    pub fn transition(&mut self, to: OrderStatus, now: DateTime<Utc>) -> Result<(), ExecutionError> {
        if self.status == to {
            return Ok(());
        }
        if !is_valid_transition(self.status, to) {
            return Err(ExecutionError::InvalidTransition {
                key: self.key.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn reject(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), ExecutionError> {
        self.transition(OrderStatus::Rejected, now)?;
        self.reject_reason = Some(reason.into());
        Ok(())
    }

    /// Append a fill, refusing to exceed the requested quantity
    pub fn add_fill(&mut self, fill: Fill) -> Result<(), ExecutionError> {
        let filled = self.filled_quantity();
        if filled + fill.quantity > self.quantity {
            return Err(ExecutionError::Overfill {
                key: self.key.clone(),
                filled,
                delta: fill.quantity,
                quantity: self.quantity,
            });
        }
        self.updated_at = fill.timestamp;
        self.fills.push(fill);
        Ok(())
    }

    /// Bring the order in line with the exchange's cumulative view
    ///
    /// Returns the new fill, if the exchange reports more executed quantity
    /// than we have recorded. The fill's price and fee are the increments
    /// implied by the cumulative average price and commission.
    pub fn apply_exchange_state(
        &mut self,
        remote: &ExchangeOrder,
        now: DateTime<Utc>,
    ) -> Result<Option<Fill>, ExecutionError> {
        if self.exchange_order_id.is_none() {
            self.exchange_order_id = Some(remote.exchange_order_id.clone());
        }
        if self.status == OrderStatus::Pending {
            self.transition(OrderStatus::Submitted, now)?;
        }

        let filled = self.filled_quantity();
        let delta = remote.executed_quantity - filled;
        let fill = if delta > Decimal::ZERO {
            let prior_value: Decimal = self.fills.iter().map(|f| f.quantity * f.price).sum();
            let price = (remote.executed_quantity * remote.average_price - prior_value) / delta;
            let fee = (remote.commission - self.total_fees()).max(Decimal::ZERO);
            let fill = Fill {
                order_key: self.key.clone(),
                quantity: delta,
                price: if price > Decimal::ZERO {
                    price
                } else {
                    remote.average_price
                },
                fee,
                timestamp: remote.updated_at,
            };
            self.add_fill(fill.clone())?;
            Some(fill)
        } else {
            None
        };

        let target = match remote.status {
            // fills reported while the exchange still says NEW
            OrderStatus::Submitted if !self.fills.is_empty() => OrderStatus::PartiallyFilled,
            OrderStatus::Pending => OrderStatus::Submitted,
            // partially filled orders cannot expire; the rest was cancelled
            OrderStatus::Expired if !self.fills.is_empty() => OrderStatus::Cancelled,
            status => status,
        };
        if self.status != target {
            self.transition(target, now)?;
        }
        Ok(fill)
    }
}

/// Lifecycle notification broadcast to strategies
#[derive(Debug, Clone, PartialEq)]
pub struct OrderEvent {
    pub key: String,
    pub symbol: String,
    pub side: Side,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub average_price: Decimal,
    pub rationale: String,
    pub reason: Option<String>,
}

impl From<&Order> for OrderEvent {
    fn from(order: &Order) -> Self {
        Self {
            key: order.key.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            status: order.status,
            filled_quantity: order.filled_quantity(),
            average_price: order.average_fill_price(),
            rationale: order.rationale.clone(),
            reason: order.reject_reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::TradeIntent;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn order(quantity: Decimal) -> Order {
        let intent = TradeIntent::market("BTC-USDT", Side::Buy, quantity, dec!(50000), "test");
        let sized = SizedIntent {
            quantity,
            notional: quantity * dec!(50000),
            reducing_quantity: Decimal::ZERO,
            intent,
        };
        Order::from_intent("k1", &sized, Utc::now())
    }

    fn remote(status: OrderStatus, executed: Decimal, avg: Decimal, commission: Decimal) -> ExchangeOrder {
        ExchangeOrder {
            exchange_order_id: "9001".to_string(),
            client_order_id: "k1".to_string(),
            symbol: "BTC-USDT".to_string(),
            side: Side::Buy,
            order_type: OrderType::Market,
            quantity: dec!(1),
            price: None,
            status,
            executed_quantity: executed,
            average_price: avg,
            commission,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        assert!(is_valid_transition(OrderStatus::Pending, OrderStatus::Submitted));
        assert!(is_valid_transition(OrderStatus::Pending, OrderStatus::Rejected));
        assert!(is_valid_transition(OrderStatus::Submitted, OrderStatus::Expired));
        assert!(!is_valid_transition(OrderStatus::Pending, OrderStatus::Filled));
        assert!(!is_valid_transition(OrderStatus::Filled, OrderStatus::Cancelled));
        assert!(!is_valid_transition(OrderStatus::PartiallyFilled, OrderStatus::Rejected));
    }

    #[test]
    fn test_terminal_order_cannot_move() {
        let mut order = order(dec!(1));
        order.transition(OrderStatus::Submitted, Utc::now()).unwrap();
        order.transition(OrderStatus::Cancelled, Utc::now()).unwrap();
        let err = order.transition(OrderStatus::Filled, Utc::now()).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidTransition { .. }));
    }

    #[test]
    fn test_overfill_is_refused() {
        let mut order = order(dec!(1));
        let fill = |qty| Fill {
            order_key: "k1".to_string(),
            quantity: qty,
            price: dec!(100),
            fee: Decimal::ZERO,
            timestamp: Utc::now(),
        };
        order.add_fill(fill(dec!(0.6))).unwrap();
        assert!(matches!(
            order.add_fill(fill(dec!(0.5))),
            Err(ExecutionError::Overfill { .. })
        ));
        assert_eq!(order.filled_quantity(), dec!(0.6));
    }

    #[test]
    fn test_fill_deltas_from_cumulative_state() {
        let mut order = order(dec!(1));
        let now = Utc::now();

        let first = order
            .apply_exchange_state(
                &remote(OrderStatus::PartiallyFilled, dec!(0.4), dec!(100), dec!(0.04)),
                now,
            )
            .unwrap()
            .unwrap();
        assert_eq!(first.quantity, dec!(0.4));
        assert_eq!(first.price, dec!(100));
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.exchange_order_id.as_deref(), Some("9001"));

        // cumulative avg 103 over 1.0 => second chunk of 0.6 at 105
        let second = order
            .apply_exchange_state(
                &remote(OrderStatus::Filled, dec!(1), dec!(103), dec!(0.10)),
                now,
            )
            .unwrap()
            .unwrap();
        assert_eq!(second.quantity, dec!(0.6));
        assert_eq!(second.price, dec!(105));
        assert_eq!(second.fee, dec!(0.06));
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.average_fill_price(), dec!(103));

        // same report again adds nothing
        assert!(order
            .apply_exchange_state(
                &remote(OrderStatus::Filled, dec!(1), dec!(103), dec!(0.10)),
                now
            )
            .unwrap()
            .is_none());
    }
}
