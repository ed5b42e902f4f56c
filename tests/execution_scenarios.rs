//! End-to-end order flow against an in-memory exchange
//!
//! To run these tests:
//! ```
//! cargo test --test execution_scenarios
//! ```

mod common;

use bingx_trader::common::types::{MarketEvent, OrderStatus, Side};
use bingx_trader::coordinator::{PipelineInput, SymbolPipeline};
use bingx_trader::execution::{ExecutionError, Order};
use bingx_trader::risk::{FeeSchedule, RejectReason, RiskDecision, RiskLimits, RiskManager};
use bingx_trader::strategy::{build_strategy, SignalEngine, TradeIntent};
use bingx_trader::tracker::{initial_reconcile, Reconciler};
use bingx_trader::{ExecutionEngine, PositionTracker, SizedIntent};
use chrono::{Duration, Utc};
use common::{app_config, snapshot, tick, MockExchange, SubmitScript, SYMBOL};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration as StdDuration;

struct Harness {
    exchange: Arc<MockExchange>,
    tracker: Arc<PositionTracker>,
    engine: Arc<ExecutionEngine>,
    risk: Arc<RiskManager>,
}

/// Components wired the way the coordinator wires them, after startup reconciliation
async fn harness(exchange: MockExchange) -> Harness {
    let config = app_config();
    let exchange = Arc::new(exchange);
    let tracker = Arc::new(PositionTracker::new(
        "USDT",
        config.symbol_names(),
        config.risk.position_tolerance,
    ));
    let engine = Arc::new(ExecutionEngine::new(
        exchange.clone(),
        tracker.clone(),
        &config.settings,
    ));
    let reconciler = Reconciler::new(
        exchange.clone(),
        tracker.clone(),
        engine.clone(),
        config.symbol_names(),
    );
    initial_reconcile(&reconciler).await.unwrap();

    let risk = Arc::new(RiskManager::new(
        RiskLimits::from_config(&config),
        FeeSchedule::from_config(&config.risk),
    ));
    Harness {
        exchange,
        tracker,
        engine,
        risk,
    }
}

fn buy(quantity: Decimal) -> TradeIntent {
    TradeIntent::market(SYMBOL, Side::Buy, quantity, dec!(50000), "scenario")
}

// ============================================================================
// Risk gate
// ============================================================================

#[tokio::test]
async fn test_second_intent_rejected_before_first_confirms() {
    let h = harness(MockExchange::new(snapshot(dec!(1000), vec![]))).await;
    let now = Utc::now();

    let RiskDecision::Approved(sized) = h.risk.evaluate(&h.tracker.view(), &buy(dec!(0.01)), now) else {
        panic!("first intent should be approved");
    };
    assert_eq!(sized.quantity, dec!(0.01));
    assert_eq!(sized.notional, dec!(500));

    // submitted but not yet acknowledged: the balance is still 1000
    let pending = Order::from_intent(h.engine.next_key(), &sized, now);
    h.tracker.record_order(&pending);
    assert_eq!(h.tracker.view().free_quote(), dec!(1000));

    let second = h.risk.evaluate(&h.tracker.view(), &buy(dec!(0.01)), now);
    assert!(
        matches!(second, RiskDecision::Rejected(RejectReason::InsufficientBalance { .. })),
        "{:?}",
        second
    );
}

// ============================================================================
// Idempotent submission
// ============================================================================

#[tokio::test]
async fn test_lost_acknowledgement_adopts_accepted_order() {
    let exchange = MockExchange::new(snapshot(dec!(1000), vec![]));
    exchange.script(vec![SubmitScript::AcceptThenTimeout(dec!(50100))]);
    let h = harness(exchange).await;

    let RiskDecision::Approved(sized) = h.risk.evaluate(&h.tracker.view(), &buy(dec!(0.01)), Utc::now()) else {
        panic!("intent should be approved");
    };
    let order = h.engine.execute(&sized).await.unwrap();

    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.exchange_order_id.as_deref(), Some("1"));
    assert_eq!(h.exchange.orders_for(&order.key), 1);
    assert_eq!(h.exchange.submissions().len(), 1);
    assert_eq!(h.tracker.view().position_quantity(SYMBOL), dec!(0.01));
}

#[tokio::test]
async fn test_unseen_submission_is_resent_under_same_key() {
    let exchange = MockExchange::new(snapshot(dec!(1000), vec![]));
    exchange.script(vec![SubmitScript::Timeout, SubmitScript::Fill(dec!(50000))]);
    let h = harness(exchange).await;

    let RiskDecision::Approved(sized) = h.risk.evaluate(&h.tracker.view(), &buy(dec!(0.01)), Utc::now()) else {
        panic!("intent should be approved");
    };
    let order = h.engine.execute(&sized).await.unwrap();

    assert_eq!(order.status, OrderStatus::Filled);
    let submissions = h.exchange.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].client_order_id, order.key);
}

#[tokio::test]
async fn test_same_key_is_never_sent_twice() {
    let h = harness(MockExchange::new(snapshot(dec!(1000), vec![]))).await;
    let RiskDecision::Approved(sized) = h.risk.evaluate(&h.tracker.view(), &buy(dec!(0.001)), Utc::now()) else {
        panic!("intent should be approved");
    };
    let order = Order::from_intent(h.engine.next_key(), &sized, Utc::now());

    let first = h.engine.submit(order.clone()).await.unwrap();
    let second = h.engine.submit(order).await.unwrap();

    assert_eq!(first.key, second.key);
    assert_eq!(second.status, OrderStatus::Filled);
    assert_eq!(h.exchange.orders_for(&first.key), 1);
    assert_eq!(h.tracker.view().position_quantity(SYMBOL), dec!(0.001));
}

#[tokio::test]
async fn test_key_stays_used_after_its_record_ages_out() {
    let h = harness(MockExchange::new(snapshot(dec!(1000000), vec![]))).await;
    let sized = SizedIntent {
        intent: buy(dec!(0.001)),
        quantity: dec!(0.001),
        notional: dec!(50),
        reducing_quantity: Decimal::ZERO,
    };

    let first = h.engine.execute(&sized).await.unwrap();
    assert_eq!(first.status, OrderStatus::Filled);
    // enough later orders to push the first out of the order history
    for _ in 0..1000 {
        h.engine.execute(&sized).await.unwrap();
    }
    assert!(h.engine.order(&first.key).is_none());

    let again = Order::from_intent(first.key.clone(), &sized, Utc::now());
    let result = h.engine.submit(again).await;

    assert!(matches!(result, Err(ExecutionError::DuplicateKey(ref key)) if *key == first.key));
    assert_eq!(h.exchange.orders_for(&first.key), 1);
    assert_eq!(h.exchange.submissions().len(), 1001);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submits_under_one_key_reach_exchange_once() {
    let exchange = MockExchange::new(snapshot(dec!(1000), vec![]));
    exchange.script(vec![SubmitScript::Slow(StdDuration::from_millis(50), dec!(50000))]);
    let h = harness(exchange).await;
    let RiskDecision::Approved(sized) = h.risk.evaluate(&h.tracker.view(), &buy(dec!(0.001)), Utc::now()) else {
        panic!("intent should be approved");
    };
    let order = Order::from_intent("manual-key-1", &sized, Utc::now());

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let engine = h.engine.clone();
        let order = order.clone();
        tasks.spawn(async move { engine.submit(order).await });
    }
    while let Some(joined) = tasks.join_next().await {
        let recorded = joined.unwrap().unwrap();
        assert_eq!(recorded.key, "manual-key-1");
    }

    assert_eq!(h.exchange.orders_for("manual-key-1"), 1);
    assert_eq!(h.tracker.view().position_quantity(SYMBOL), dec!(0.001));
}

#[tokio::test]
async fn test_exchange_rejection_releases_reservation() {
    let exchange = MockExchange::new(snapshot(dec!(1000), vec![]));
    exchange.script(vec![SubmitScript::Reject(101204, "Insufficient margin")]);
    let h = harness(exchange).await;
    let mut events = h.engine.subscribe();

    let RiskDecision::Approved(sized) = h.risk.evaluate(&h.tracker.view(), &buy(dec!(0.01)), Utc::now()) else {
        panic!("intent should be approved");
    };
    let order = h.engine.execute(&sized).await.unwrap();

    assert_eq!(order.status, OrderStatus::Rejected);
    let view = h.tracker.view();
    assert!(view.open_orders.is_empty());
    assert_eq!(view.available_quote(), dec!(1000));
    assert_eq!(events.try_recv().unwrap().status, OrderStatus::Rejected);
}

#[tokio::test]
async fn test_cancel_of_filled_order_is_a_no_op() {
    let h = harness(MockExchange::new(snapshot(dec!(1000), vec![]))).await;
    let RiskDecision::Approved(sized) = h.risk.evaluate(&h.tracker.view(), &buy(dec!(0.001)), Utc::now()) else {
        panic!("intent should be approved");
    };
    let order = h.engine.execute(&sized).await.unwrap();
    assert_eq!(order.status, OrderStatus::Filled);

    let cancelled = h.engine.cancel(&order.key).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Filled);
    assert_eq!(h.tracker.view().position_quantity(SYMBOL), dec!(0.001));
}

// ============================================================================
// Protective exits through the pipeline
// ============================================================================

#[tokio::test]
async fn test_stop_loss_closes_despite_exhausted_margin() {
    // 10 USDT free: no new exposure could pass the balance check
    let exchange = MockExchange::new(snapshot(dec!(10), vec![(SYMBOL, dec!(0.04), dec!(50000))]));
    exchange.script(vec![SubmitScript::Fill(dec!(47000))]);
    let h = harness(exchange).await;
    assert_eq!(h.tracker.view().position_quantity(SYMBOL), dec!(0.04));

    let config = app_config();
    let signals = SignalEngine::new(
        SYMBOL,
        build_strategy(&config.strategy).unwrap(),
        Duration::seconds(15),
    );
    let mut pipeline = SymbolPipeline::new(
        signals,
        h.risk.clone(),
        h.engine.clone(),
        h.tracker.clone(),
        dec!(0.01),
    );

    let now = Utc::now();
    // -6% against a 5% stop
    let submitted = pipeline
        .handle(PipelineInput::Market(MarketEvent::Tick(tick(dec!(47000), now))), now)
        .await
        .unwrap();

    assert!(submitted >= 1);
    let close = &h.exchange.submissions()[0];
    assert_eq!(close.side, Side::Sell);
    assert_eq!(close.quantity, dec!(0.04));
    assert!(h.tracker.view().position_quantity(SYMBOL).is_zero());
}
