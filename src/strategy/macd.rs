//! MACD momentum strategy
//!
//! Builds one-minute bars from ticks and trades when the MACD histogram is
//! accelerating in one direction, optionally confirmed by order book pressure
//! near the current price.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::debug;

use crate::common::types::{DepthSnapshot, Side};
use crate::config::types::StrategyConfig;
use crate::execution::OrderEvent;
use crate::strategy::traits::Strategy;
use crate::strategy::types::{MarketState, StrategyContext, TradeIntent};

const BAR_SECONDS: i64 = 60;
/// Book levels within this fraction of the price count towards pressure
const DEPTH_BAND: f64 = 0.01;
const MIN_STRENGTH: f64 = 0.0001;
const CROSS_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
struct MacdPoint {
    macd: f64,
    signal: f64,
    histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Buy,
    Sell,
    Hold,
}

pub struct MacdMomentum {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
    momentum_threshold_pct: f64,
    depth_pressure_ratio: f64,
    closes: VecDeque<f64>,
    history: VecDeque<MacdPoint>,
    /// (bar index, running close) of the bar in progress
    open_bar: Option<(i64, f64)>,
    last_signal: Option<Signal>,
}

impl MacdMomentum {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            fast_period: config.fast_period,
            slow_period: config.slow_period,
            signal_period: config.signal_period,
            momentum_threshold_pct: config.momentum_threshold_pct,
            depth_pressure_ratio: config.depth_pressure_ratio,
            closes: VecDeque::new(),
            history: VecDeque::new(),
            open_bar: None,
            last_signal: None,
        }
    }

    fn push_close(&mut self, close: f64) {
        self.closes.push_back(close);
        while self.closes.len() > self.slow_period * 2 {
            self.closes.pop_front();
        }
        self.update_macd();
    }

    /// EMA seeded with the first value of the window
    fn ema<'a>(period: usize, values: impl ExactSizeIterator<Item = &'a f64>) -> Option<f64> {
        if values.len() < period {
            return None;
        }
        let multiplier = 2.0 / (period as f64 + 1.0);
        let mut values = values;
        let mut ema = *values.next()?;
        for value in values {
            ema = value * multiplier + ema * (1.0 - multiplier);
        }
        Some(ema)
    }

    fn update_macd(&mut self) {
        if self.closes.len() < self.slow_period {
            return;
        }
        let fast = Self::ema(self.fast_period, self.closes.iter()).unwrap_or_default();
        let slow = Self::ema(self.slow_period, self.closes.iter()).unwrap_or_default();
        let macd = fast - slow;

        let mut macd_values: Vec<f64> = self.history.iter().map(|p| p.macd).collect();
        macd_values.push(macd);
        let signal = Self::ema(self.signal_period, macd_values.iter()).unwrap_or_default();

        self.history.push_back(MacdPoint {
            macd,
            signal,
            histogram: macd - signal,
        });
        while self.history.len() > self.signal_period * 2 {
            self.history.pop_front();
        }
    }

    /// Direction and size (percent) of an accelerating histogram move
    fn momentum_trend(&self) -> Option<(bool, f64)> {
        let n = self.history.len();
        if n < 3 {
            return None;
        }
        let current = self.history[n - 1];
        let previous = self.history[n - 2];
        let before = self.history[n - 3];

        let curr_change = current.histogram - previous.histogram;
        let prev_change = previous.histogram - before.histogram;
        let acceleration = curr_change - prev_change;
        if previous.histogram == 0.0 {
            return None;
        }
        let change_pct = curr_change.abs() / previous.histogram.abs() * 100.0;

        let rising = curr_change > 0.0 && prev_change > 0.0 && acceleration > 0.0;
        let falling = curr_change < 0.0 && prev_change < 0.0 && acceleration < 0.0;
        if rising || falling {
            Some((rising, change_pct))
        } else {
            None
        }
    }

    fn signal(&self) -> Signal {
        let Some(current) = self.history.back() else {
            return Signal::Hold;
        };
        let Some((rising, change_pct)) = self.momentum_trend() else {
            return Signal::Hold;
        };
        if change_pct <= self.momentum_threshold_pct {
            return Signal::Hold;
        }
        let near_cross = current.signal != 0.0
            && (current.macd - current.signal).abs() / current.signal.abs() < CROSS_TOLERANCE;

        if rising && (current.macd >= current.signal || near_cross) {
            Signal::Buy
        } else if !rising && (current.macd <= current.signal || near_cross) {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }

    fn strength(&self) -> f64 {
        let n = self.history.len();
        if n < 2 {
            return 0.0;
        }
        (self.history[n - 1].histogram - self.history[n - 2].histogram).abs()
    }

    /// Whether book pressure near `price` agrees with `side`; absent depth agrees
    fn depth_confirms(&self, depth: Option<&DepthSnapshot>, price: Decimal, side: Side) -> bool {
        let Some(depth) = depth else {
            return true;
        };
        let band = Decimal::try_from(DEPTH_BAND).unwrap_or_default();
        let bids = depth
            .bid_volume_above(price * (Decimal::ONE - band))
            .to_f64()
            .unwrap_or_default();
        let asks = depth
            .ask_volume_below(price * (Decimal::ONE + band))
            .to_f64()
            .unwrap_or_default();

        match side {
            Side::Buy => asks > 0.0 && bids / asks > self.depth_pressure_ratio,
            Side::Sell => bids > 0.0 && asks / bids > self.depth_pressure_ratio,
        }
    }

    fn intent_for(&self, side: Side, price: Decimal, ctx: &StrategyContext) -> Option<TradeIntent> {
        let (quantity, rationale) = match side {
            Side::Buy if ctx.is_short() => (ctx.position.abs(), "macd_cover"),
            Side::Buy if ctx.is_flat() => (ctx.order_quantity, "macd_long"),
            Side::Sell if ctx.is_long() => (ctx.position.abs(), "macd_exit"),
            Side::Sell if ctx.is_flat() => (ctx.order_quantity, "macd_short"),
            _ => return None,
        };
        Some(TradeIntent::market(
            &ctx.symbol,
            side,
            quantity,
            price,
            rationale,
        ))
    }
}

impl Strategy for MacdMomentum {
    fn name(&self) -> &str {
        "macd_momentum"
    }

    fn evaluate(&mut self, market: &MarketState, ctx: &StrategyContext) -> Vec<TradeIntent> {
        let tick = &market.tick;
        let Some(price) = tick.last_price.to_f64() else {
            return Vec::new();
        };

        let bar = tick.timestamp.timestamp().div_euclid(BAR_SECONDS);
        match self.open_bar {
            Some((open, _)) if open == bar => self.open_bar = Some((bar, price)),
            Some((open, close)) if bar > open => {
                self.push_close(close);
                self.open_bar = Some((bar, price));
            }
            Some(_) => {}
            None => self.open_bar = Some((bar, price)),
        }

        if ctx.has_open_orders {
            return Vec::new();
        }

        let side = match self.signal() {
            Signal::Buy => Side::Buy,
            Signal::Sell => Side::Sell,
            Signal::Hold => return Vec::new(),
        };
        let signal = if side == Side::Buy {
            Signal::Buy
        } else {
            Signal::Sell
        };
        if self.last_signal == Some(signal) || self.strength() <= MIN_STRENGTH {
            return Vec::new();
        }
        if !self.depth_confirms(tick.depth.as_ref(), tick.last_price, side) {
            return Vec::new();
        }

        match self.intent_for(side, tick.execution_price(side), ctx) {
            Some(intent) => {
                debug!(symbol = %ctx.symbol, %side, rationale = %intent.rationale, "MACD signal");
                self.last_signal = Some(signal);
                vec![intent]
            }
            None => Vec::new(),
        }
    }

    fn on_order_update(&mut self, event: &OrderEvent) {
        // a rejected entry may be retried on the next signal
        if event.status == crate::common::types::OrderStatus::Rejected {
            self.last_signal = None;
        }
    }

    fn warm_up(&mut self, closes: &[Decimal]) {
        for close in closes {
            if let Some(close) = close.to_f64() {
                self.push_close(close);
            }
        }
    }
}
