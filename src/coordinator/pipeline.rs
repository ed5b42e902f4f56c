//! Strategy → risk → execution for one symbol
//!
//! Inputs are handled one at a time; a submission is awaited before the next
//! input is looked at, so every risk evaluation sees the state left by the
//! previous order.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::errors::{ClientError, Result};
use crate::common::types::{MarketEvent, Tick};
use crate::execution::{ExecutionEngine, ExecutionError, OrderEvent};
use crate::risk::{RiskDecision, RiskManager};
use crate::strategy::{SignalEngine, StrategyContext, TradeIntent};
use crate::tracker::PositionTracker;

/// Work item for a symbol pipeline
#[derive(Debug, Clone)]
pub enum PipelineInput {
    Market(MarketEvent),
    Timer,
    OrderUpdate(OrderEvent),
}

pub struct SymbolPipeline {
    signals: SignalEngine,
    risk: Arc<RiskManager>,
    execution: Arc<ExecutionEngine>,
    tracker: Arc<PositionTracker>,
    order_quantity: Decimal,
}

impl SymbolPipeline {
    pub fn new(
        signals: SignalEngine,
        risk: Arc<RiskManager>,
        execution: Arc<ExecutionEngine>,
        tracker: Arc<PositionTracker>,
        order_quantity: Decimal,
    ) -> Self {
        Self {
            signals,
            risk,
            execution,
            tracker,
            order_quantity,
        }
    }

    pub fn symbol(&self) -> &str {
        self.signals.symbol()
    }

    /// Process inputs until the channel closes or `shutdown` fires
    ///
    /// An input already being handled is finished first, so an in-flight
    /// submission always completes.
    pub async fn run(
        mut self,
        mut inputs: mpsc::Receiver<PipelineInput>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!(symbol = %self.symbol(), strategy = %self.signals.strategy_name(), "Pipeline started");
        loop {
            let input = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                input = inputs.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
            };
            if let Err(err) = self.handle(input, Utc::now()).await {
                return Err(match err {
                    ExecutionError::Client(client) => client,
                    other => ClientError::Internal(other.to_string()),
                });
            }
        }
        info!(symbol = %self.symbol(), "Pipeline stopped");
        Ok(())
    }

    /// Handle one input; returns how many orders were submitted
    ///
    /// Only errors that make further trading unsafe are returned.
    pub async fn handle(&mut self, input: PipelineInput, now: DateTime<Utc>) -> std::result::Result<usize, ExecutionError> {
        match input {
            PipelineInput::Market(MarketEvent::Tick(tick)) => self.on_tick(tick, now).await,
            PipelineInput::Market(MarketEvent::Gap { reason, .. }) => {
                self.signals.on_gap(&reason);
                Ok(0)
            }
            PipelineInput::Market(other) => {
                debug!(symbol = %self.symbol(), event = ?other, "Ignoring market event");
                Ok(0)
            }
            PipelineInput::Timer => {
                let mut submitted = self.protective_exits(now).await?;
                let ctx = self.context(now);
                let intents = self.signals.on_timer(&ctx, now);
                submitted += self.process(intents, now).await?;
                Ok(submitted)
            }
            PipelineInput::OrderUpdate(event) => {
                self.signals.on_order_update(&event);
                Ok(0)
            }
        }
    }

    async fn on_tick(&mut self, tick: Tick, now: DateTime<Utc>) -> std::result::Result<usize, ExecutionError> {
        self.tracker.mark_to_market(&tick);
        let mut submitted = self.protective_exits(now).await?;

        let ctx = self.context(now);
        let intents = self.signals.on_tick(tick, &ctx, now);
        submitted += self.process(intents, now).await?;
        Ok(submitted)
    }

    async fn protective_exits(&mut self, now: DateTime<Utc>) -> std::result::Result<usize, ExecutionError> {
        let view = self.tracker.view();
        let exits: Vec<TradeIntent> = self
            .risk
            .check_exits(&view, now)
            .into_iter()
            .filter(|intent| intent.symbol == self.symbol())
            .collect();
        self.process(exits, now).await
    }

    fn context(&self, now: DateTime<Utc>) -> StrategyContext {
        StrategyContext::from_view(&self.tracker.view(), self.symbol(), self.order_quantity, now)
    }

    async fn process(&mut self, intents: Vec<TradeIntent>, now: DateTime<Utc>) -> std::result::Result<usize, ExecutionError> {
        let mut submitted = 0;
        for intent in intents {
            // each evaluation sees the previous order's effect
            let view = self.tracker.view();
            let sized = match self.risk.evaluate(&view, &intent, now) {
                RiskDecision::Approved(sized) => sized,
                RiskDecision::Rejected(_) => continue,
            };

            match self.execution.execute(&sized).await {
                Ok(order) => {
                    submitted += 1;
                    info!(
                        symbol = %order.symbol,
                        key = %order.key,
                        side = %order.side,
                        quantity = %order.quantity,
                        status = %order.status,
                        rationale = %order.rationale,
                        "Order placed"
                    );
                }
                Err(ExecutionError::Client(err)) if err.is_fatal() => {
                    return Err(ExecutionError::Client(err));
                }
                Err(err) => warn!(symbol = %intent.symbol, error = %err, "Execution failed"),
            }
        }
        Ok(submitted)
    }
}
