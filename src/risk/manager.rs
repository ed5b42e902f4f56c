//! Pre-trade risk gate and protective exits

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info};

use super::fees::FeeSchedule;
use super::limits::RiskLimits;
use crate::common::types::Side;
use crate::strategy::TradeIntent;
use crate::tracker::StateView;

/// An intent cleared for execution
#[derive(Debug, Clone, PartialEq)]
pub struct SizedIntent {
    pub intent: TradeIntent,
    /// Approved quantity, at most the requested one
    pub quantity: Decimal,
    /// Estimated notional at the reference price
    pub notional: Decimal,
    /// Part of `quantity` that reduces an existing position
    pub reducing_quantity: Decimal,
}

/// Why an intent was refused
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RejectReason {
    #[error("account state is stale: {0}")]
    StaleState(String),

    #[error("trading blocked until positions reconcile")]
    TradingBlocked,

    #[error("unknown symbol {0}")]
    UnknownSymbol(String),

    #[error("intent has no usable reference price")]
    NoPrice,

    #[error("position limit reached for {symbol}")]
    PositionLimit { symbol: String },

    #[error("aggregate exposure limit reached")]
    ExposureLimit,

    #[error("insufficient balance: need {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    #[error("order below exchange minimum: {0}")]
    BelowMinimum(String),

    #[error("nothing to close for {0}")]
    NothingToClose(String),
}

/// Outcome of a risk evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Approved(SizedIntent),
    Rejected(RejectReason),
}

impl RiskDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved(_))
    }
}

/// Stateless risk evaluation over published state views
#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: RiskLimits,
    fees: FeeSchedule,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, fees: FeeSchedule) -> Self {
        Self { limits, fees }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Gate one intent. Checks run in order and the first failure wins.
    pub fn evaluate(&self, view: &StateView, intent: &TradeIntent, now: DateTime<Utc>) -> RiskDecision {
        let decision = self.evaluate_inner(view, intent, now);
        match &decision {
            RiskDecision::Approved(sized) => debug!(
                symbol = %intent.symbol,
                side = %intent.side,
                requested = %intent.quantity,
                approved = %sized.quantity,
                "Intent approved"
            ),
            RiskDecision::Rejected(reason) => info!(
                symbol = %intent.symbol,
                side = %intent.side,
                requested = %intent.quantity,
                reason = %reason,
                "Intent rejected"
            ),
        }
        decision
    }

    fn evaluate_inner(&self, view: &StateView, intent: &TradeIntent, now: DateTime<Utc>) -> RiskDecision {
        use RiskDecision::Rejected;

        // (a) freshness, for every intent including forced ones
        match view.snapshot_age(now) {
            None => return Rejected(RejectReason::StaleState("never reconciled".to_string())),
            Some(age) if age > self.limits.max_snapshot_age => {
                return Rejected(RejectReason::StaleState(format!(
                    "snapshot is {}s old",
                    age.num_seconds()
                )));
            }
            Some(_) => {}
        }
        if view.trading_blocked {
            return Rejected(RejectReason::TradingBlocked);
        }

        let Some(symbol_limits) = self.limits.symbol(&intent.symbol) else {
            return Rejected(RejectReason::UnknownSymbol(intent.symbol.clone()));
        };
        let price = intent.reference_price;
        if price <= Decimal::ZERO {
            return Rejected(RejectReason::NoPrice);
        }

        let current = view.position_quantity(&intent.symbol);
        let requested = symbol_limits.round_quantity(intent.quantity.max(Decimal::ZERO));
        let reducing = match Side::closing(current) {
            Some(side) if side == intent.side => requested.min(current.abs()),
            _ => Decimal::ZERO,
        };

        if intent.forced {
            if reducing <= Decimal::ZERO {
                return Rejected(RejectReason::NothingToClose(intent.symbol.clone()));
            }
            return RiskDecision::Approved(SizedIntent {
                intent: intent.clone(),
                quantity: reducing,
                notional: reducing * price,
                reducing_quantity: reducing,
            });
        }

        let opening_requested = requested - reducing;
        let mut opening = opening_requested;

        if opening_requested > Decimal::ZERO {
            // (b) per-symbol headroom after the reducing part is applied
            let held_after_reduce = if reducing > Decimal::ZERO {
                current.abs() - reducing
            } else {
                current.abs()
            };
            let pending = view.pending_quantity(&intent.symbol, intent.side);
            let symbol_headroom = symbol_limits.max_position_qty - held_after_reduce - pending;
            if symbol_headroom <= Decimal::ZERO && reducing.is_zero() {
                return Rejected(RejectReason::PositionLimit {
                    symbol: intent.symbol.clone(),
                });
            }

            // (c) aggregate headroom; the reducing part frees exposure first
            let exposure = view.marked_exposure() + view.pending_notional() - reducing * price;
            let capacity = view.equity() * self.limits.max_exposure_ratio;
            let aggregate_headroom = (capacity - exposure) / price;
            if aggregate_headroom <= Decimal::ZERO && reducing.is_zero() {
                return Rejected(RejectReason::ExposureLimit);
            }

            opening = opening_requested
                .min(symbol_headroom)
                .min(aggregate_headroom)
                .max(Decimal::ZERO);
            opening = symbol_limits.round_quantity(opening);
        }

        let quantity = reducing + opening;
        if quantity <= Decimal::ZERO {
            return Rejected(RejectReason::PositionLimit {
                symbol: intent.symbol.clone(),
            });
        }

        // (d) balance for the opening part
        if opening > Decimal::ZERO {
            let opening_notional = opening * price;
            let required = opening_notional
                + self.fees.fee(opening_notional, intent.order_type)
                + opening_notional * self.limits.fee_buffer_ratio;
            let available = view.available_quote();
            if required > available {
                return Rejected(RejectReason::InsufficientBalance {
                    required,
                    available,
                });
            }
        }

        let notional = quantity * price;
        if quantity < symbol_limits.min_qty {
            return Rejected(RejectReason::BelowMinimum(format!(
                "quantity {} < {}",
                quantity, symbol_limits.min_qty
            )));
        }
        if notional < symbol_limits.min_notional {
            return Rejected(RejectReason::BelowMinimum(format!(
                "notional {} < {}",
                notional, symbol_limits.min_notional
            )));
        }

        RiskDecision::Approved(SizedIntent {
            intent: intent.clone(),
            quantity,
            notional,
            reducing_quantity: reducing,
        })
    }

    /// (e) Forced closing intents for positions past stop-loss or take-profit
    ///
    /// Symbols that already have a closing order working are skipped.
    pub fn check_exits(&self, view: &StateView, _now: DateTime<Utc>) -> Vec<TradeIntent> {
        let mut intents = Vec::new();
        let mut symbols: Vec<&String> = view.positions.keys().collect();
        symbols.sort();

        for symbol in symbols {
            let position = &view.positions[symbol];
            let (Some(side), Some(pnl_pct), Some(mark)) = (
                Side::closing(position.quantity),
                position.unrealized_pnl_pct(),
                position.mark_price,
            ) else {
                continue;
            };
            if view.has_pending_close(symbol) {
                continue;
            }

            let net_pct = pnl_pct - self.fees.round_trip_pct();
            let rationale = if pnl_pct <= -self.limits.stop_loss_pct {
                "stop_loss"
            } else if net_pct >= self.limits.take_profit_pct {
                "take_profit"
            } else {
                continue;
            };

            info!(
                symbol = %symbol,
                pnl_pct = %pnl_pct.round_dp(2),
                rationale,
                "Protective exit triggered"
            );
            intents.push(TradeIntent::forced_close(
                symbol.clone(),
                side,
                position.quantity.abs(),
                mark,
                rationale,
            ));
        }
        intents
    }
}
