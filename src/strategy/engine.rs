//! Per-symbol wrapper that decides when a strategy may act

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::common::types::Tick;
use crate::execution::OrderEvent;
use crate::strategy::traits::BoxedStrategy;
use crate::strategy::types::{MarketState, StrategyContext, TradeIntent};

/// Drives one strategy for one symbol
///
/// The strategy always sees every tick so its indicators stay current, but
/// intents are only passed on while the market is known: no open gap and the
/// newest tick no older than `staleness`.
pub struct SignalEngine {
    symbol: String,
    strategy: BoxedStrategy,
    staleness: Duration,
    last_tick_at: Option<DateTime<Utc>>,
    in_gap: bool,
    sequence: u64,
}

impl SignalEngine {
    pub fn new(symbol: impl Into<String>, strategy: BoxedStrategy, staleness: Duration) -> Self {
        Self {
            symbol: symbol.into(),
            strategy,
            staleness,
            last_tick_at: None,
            in_gap: false,
            sequence: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Whether fresh, continuous data is available at `now`
    pub fn market_known(&self, now: DateTime<Utc>) -> bool {
        !self.in_gap
            && self
                .last_tick_at
                .map(|at| now - at <= self.staleness)
                .unwrap_or(false)
    }

    pub fn on_tick(&mut self, tick: Tick, ctx: &StrategyContext, now: DateTime<Utc>) -> Vec<TradeIntent> {
        if tick.symbol != self.symbol {
            return Vec::new();
        }
        if self.in_gap {
            info!(symbol = %self.symbol, "Market data resumed");
            self.in_gap = false;
        }
        self.sequence += 1;
        self.last_tick_at = Some(tick.timestamp);

        let market = MarketState {
            tick,
            sequence: self.sequence,
        };
        let intents = self.strategy.evaluate(&market, ctx);
        if !self.market_known(now) {
            if !intents.is_empty() {
                debug!(
                    symbol = %self.symbol,
                    dropped = intents.len(),
                    "Tick too old, intents dropped"
                );
            }
            return Vec::new();
        }
        self.own(intents)
    }

    /// Stream interrupted; nothing is emitted until the next tick
    pub fn on_gap(&mut self, reason: &str) {
        if !self.in_gap {
            info!(symbol = %self.symbol, reason, "Market data gap");
        }
        self.in_gap = true;
    }

    pub fn on_timer(&mut self, ctx: &StrategyContext, now: DateTime<Utc>) -> Vec<TradeIntent> {
        if !self.market_known(now) {
            return Vec::new();
        }
        let intents = self.strategy.on_timer(ctx);
        self.own(intents)
    }

    pub fn on_order_update(&mut self, event: &OrderEvent) {
        if event.symbol == self.symbol {
            self.strategy.on_order_update(event);
        }
    }

    pub fn warm_up(&mut self, closes: &[rust_decimal::Decimal]) {
        debug!(symbol = %self.symbol, bars = closes.len(), "Warming up strategy");
        self.strategy.warm_up(closes);
    }

    /// Drop intents for other symbols and empty quantities
    fn own(&self, intents: Vec<TradeIntent>) -> Vec<TradeIntent> {
        intents
            .into_iter()
            .filter(|i| i.symbol == self.symbol && i.quantity > rust_decimal::Decimal::ZERO)
            .collect()
    }
}
