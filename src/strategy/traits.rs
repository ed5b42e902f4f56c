use rust_decimal::Decimal;

use crate::execution::OrderEvent;
use crate::strategy::types::{MarketState, StrategyContext, TradeIntent};

/// Core strategy trait
///
/// Strategies receive market state and emit trade intents. They own their
/// indicators and read account state only through [`StrategyContext`].
///
/// # Implementation Notes
///
/// - `evaluate` must be fast and deterministic - no I/O, no clocks
/// - Position/balance info comes from StrategyContext (read-only)
/// - Sizing limits are applied afterwards by the risk manager
///
/// # Example
///
/// ```ignore
/// struct Breakout {
///     high: Decimal,
/// }
///
/// impl Strategy for Breakout {
///     fn name(&self) -> &str { "breakout" }
///
///     fn evaluate(&mut self, market: &MarketState, ctx: &StrategyContext) -> Vec<TradeIntent> {
///         let price = market.tick.last_price;
///         if price > self.high && ctx.is_flat() {
///             self.high = price;
///             return vec![TradeIntent::market(&ctx.symbol, Side::Buy, ctx.order_quantity, price, "breakout")];
///         }
///         Vec::new()
///     }
/// }
/// ```
pub trait Strategy: Send {
    /// Unique identifier for this strategy
    fn name(&self) -> &str;

    /// Called for every accepted tick of the strategy's symbol
    fn evaluate(&mut self, market: &MarketState, ctx: &StrategyContext) -> Vec<TradeIntent>;

    /// Called periodically for time-based logic
    ///
    /// Default implementation emits nothing.
    fn on_timer(&mut self, _ctx: &StrategyContext) -> Vec<TradeIntent> {
        Vec::new()
    }

    /// Called when one of the symbol's orders reaches a terminal state
    fn on_order_update(&mut self, _event: &OrderEvent) {}

    /// Seed indicators with historical closes, oldest first
    fn warm_up(&mut self, _closes: &[Decimal]) {}
}

/// Boxed strategy for dynamic dispatch
pub type BoxedStrategy = Box<dyn Strategy>;
