//! Periodic comparison of local state with the exchange

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::{PositionTracker, ReconcileOutcome};
use crate::common::errors::{ClientError, Result};
use crate::common::traits::ExchangeApi;
use crate::execution::ExecutionEngine;

pub struct Reconciler {
    exchange: Arc<dyn ExchangeApi>,
    tracker: Arc<PositionTracker>,
    engine: Arc<ExecutionEngine>,
    symbols: Vec<String>,
}

impl Reconciler {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        tracker: Arc<PositionTracker>,
        engine: Arc<ExecutionEngine>,
        symbols: Vec<String>,
    ) -> Self {
        Self {
            exchange,
            tracker,
            engine,
            symbols,
        }
    }

    /// Run one reconciliation, re-fetching once right away on first divergence
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let outcome = self.cycle().await?;
        if let ReconcileOutcome::Diverged { .. } = outcome {
            return self.cycle().await;
        }
        Ok(outcome)
    }

    async fn cycle(&self) -> Result<ReconcileOutcome> {
        let snapshot = match self.exchange.fetch_account_snapshot(&self.symbols).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.tracker.mark_stale(err.to_string());
                return Err(err);
            }
        };

        let plan = self.tracker.plan_reconciliation(&snapshot);
        debug!(
            imported = plan.imported.len(),
            missing = plan.missing.len(),
            "Reconciliation plan"
        );

        for remote in &plan.imported {
            if let Err(err) = self.engine.adopt_external(remote) {
                warn!(exchange_order_id = %remote.exchange_order_id, error = %err, "Could not adopt order");
            }
        }

        for (symbol, key) in &plan.missing {
            let result = match self.exchange.query_order(symbol, key).await {
                Err(err) if err.is_fatal() => return Err(err),
                other => other,
            };
            if let Err(err) = self.engine.resolve_order(key, result) {
                warn!(key = %key, error = %err, "Could not resolve missing order");
            }
        }

        let outcome = self.tracker.complete_reconciliation(&snapshot, Utc::now());
        match &outcome {
            ReconcileOutcome::Clean => debug!("Account state reconciled"),
            ReconcileOutcome::Diverged { symbols } => {
                warn!(?symbols, "Local positions diverge from exchange")
            }
            ReconcileOutcome::Adopted { symbols } => {
                warn!(?symbols, "Adopted exchange positions, trading blocked")
            }
        }
        Ok(outcome)
    }

    /// Reconcile every `interval` and whenever the engine asks for it
    ///
    /// Failed cycles leave the tracker stale and are retried on the next
    /// tick. Only fatal errors end the loop.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) -> Result<()> {
        let requests = self.engine.reconcile_requests();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick fires at once; startup already reconciled
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Reconciliation loop stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
                _ = requests.notified() => {
                    info!("Reconciliation requested by execution engine");
                }
            }

            match self.reconcile().await {
                Ok(_) => {}
                Err(err) if err.is_fatal() => {
                    error!(error = %err, "Fatal error during reconciliation");
                    return Err(err);
                }
                Err(err) => warn!(error = %err, "Reconciliation failed, state is stale"),
            }
        }
    }
}

/// Startup reconciliation; trading must not begin unless this succeeds
pub async fn initial_reconcile(reconciler: &Reconciler) -> Result<()> {
    match reconciler.reconcile().await {
        Ok(ReconcileOutcome::Clean) => Ok(()),
        Ok(outcome) => Err(ClientError::Internal(format!(
            "startup reconciliation did not settle: {:?}",
            outcome
        ))),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::traits::MockExchangeApi;
    use crate::common::types::{AccountSnapshot, Balance, ExchangeOrder, ExchangePosition, OrderStatus, OrderType, Side};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn snapshot(positions: Vec<(&str, Decimal)>, open_orders: Vec<ExchangeOrder>) -> AccountSnapshot {
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), Balance::new("USDT", dec!(1000), Decimal::ZERO));
        AccountSnapshot {
            balances,
            open_orders,
            positions: positions
                .into_iter()
                .map(|(symbol, quantity)| ExchangePosition {
                    symbol: symbol.to_string(),
                    quantity,
                    entry_price: dec!(50000),
                })
                .collect(),
            fetched_at: Utc::now(),
        }
    }

    fn build(mock: MockExchangeApi) -> (Reconciler, Arc<PositionTracker>, Arc<ExecutionEngine>) {
        let exchange: Arc<dyn ExchangeApi> = Arc::new(mock);
        let symbols = vec!["BTC-USDT".to_string()];
        let tracker = Arc::new(PositionTracker::new("USDT", symbols.clone(), dec!(0.00001)));
        let engine = Arc::new(ExecutionEngine::with_limits(
            exchange.clone(),
            tracker.clone(),
            1,
            chrono::Duration::seconds(60),
        ));
        (
            Reconciler::new(exchange, tracker.clone(), engine.clone(), symbols),
            tracker,
            engine,
        )
    }

    #[tokio::test]
    async fn test_startup_adopts_exchange_state_and_imports_orders() {
        let web_order = ExchangeOrder {
            exchange_order_id: "55".to_string(),
            client_order_id: String::new(),
            symbol: "BTC-USDT".to_string(),
            side: Side::Sell,
            order_type: OrderType::Limit,
            quantity: dec!(0.01),
            price: Some(dec!(60000)),
            status: OrderStatus::Submitted,
            executed_quantity: Decimal::ZERO,
            average_price: Decimal::ZERO,
            commission: Decimal::ZERO,
            updated_at: Utc::now(),
        };
        let mut mock = MockExchangeApi::new();
        mock.expect_fetch_account_snapshot()
            .returning(move |_| Ok(snapshot(vec![("BTC-USDT", dec!(0.02))], vec![web_order.clone()])));
        let (reconciler, tracker, engine) = build(mock);

        tokio_test::assert_ok!(initial_reconcile(&reconciler).await);
        let view = tracker.view();
        assert_eq!(view.position_quantity("BTC-USDT"), dec!(0.02));
        assert!(view.open_orders.contains_key("ext-55"));
        assert!(engine.order("ext-55").is_some());
    }

    #[test_log::test(tokio::test)]
    async fn test_fetch_failure_marks_stale() {
        let mut mock = MockExchangeApi::new();
        mock.expect_fetch_account_snapshot().returning(|_| {
            Err(ClientError::Network {
                message: "down".to_string(),
                attempts: 4,
            })
        });
        let (reconciler, tracker, _) = build(mock);

        tokio_test::assert_err!(initial_reconcile(&reconciler).await);
        let view = tracker.view();
        assert!(view.stale_reason.is_some());
        assert!(view.snapshot_at.is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_persistent_divergence_refetches_then_adopts() {
        let mut mock = MockExchangeApi::new();
        let mut fetches = 0;
        mock.expect_fetch_account_snapshot().times(3).returning(move |_| {
            fetches += 1;
            if fetches == 1 {
                Ok(snapshot(vec![], vec![]))
            } else {
                Ok(snapshot(vec![("BTC-USDT", dec!(0.03))], vec![]))
            }
        });
        let (reconciler, tracker, _) = build(mock);

        assert_eq!(reconciler.reconcile().await.unwrap(), ReconcileOutcome::Clean);
        let outcome = reconciler.reconcile().await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Adopted { .. }));
        let view = tracker.view();
        assert!(view.trading_blocked);
        assert_eq!(view.position_quantity("BTC-USDT"), dec!(0.03));
    }
}
