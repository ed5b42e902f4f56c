//! Wires the components together and supervises their tasks
//!
//! ```text
//! feeds ──► router ──► pipeline[symbol] ──► ExecutionEngine ──► ExchangeApi
//!                         ▲                      │
//!                         └── order events ◄─────┘
//! reconciler (interval + on demand)    order sync (interval)    strategy timer
//! ```

pub mod pipeline;
pub mod router;

pub use pipeline::{PipelineInput, SymbolPipeline};
pub use router::Router;

use chrono::Duration as ChronoDuration;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::channels::{create_event_channel, PIPELINE_CHANNEL_SIZE};
use crate::common::errors::{ClientError, Result};
use crate::common::traits::{ExchangeApi, MarketStream};
use crate::common::types::MarketEvent;
use crate::config::types::AppConfig;
use crate::execution::{ExecutionEngine, OrderEvent};
use crate::market::{symbol_groups, MarketDataFeed};
use crate::risk::{FeeSchedule, RiskLimits, RiskManager};
use crate::strategy::{build_strategy, SignalEngine};
use crate::tracker::{initial_reconcile, PositionTracker, Reconciler};

type Routes = Arc<HashMap<String, mpsc::Sender<PipelineInput>>>;

pub struct Coordinator {
    config: AppConfig,
    exchange: Arc<dyn ExchangeApi>,
    stream: Arc<dyn MarketStream>,
    warmup: HashMap<String, Vec<Decimal>>,
}

impl Coordinator {
    pub fn new(config: AppConfig, exchange: Arc<dyn ExchangeApi>, stream: Arc<dyn MarketStream>) -> Self {
        Self {
            config,
            exchange,
            stream,
            warmup: HashMap::new(),
        }
    }

    /// Historical closes, oldest first, fed to the symbol's strategy before trading
    pub fn with_warmup(mut self, symbol: impl Into<String>, closes: Vec<Decimal>) -> Self {
        self.warmup.insert(symbol.into(), closes);
        self
    }

    /// Run until `shutdown` fires or a fatal error occurs
    ///
    /// The startup reconciliation must succeed before any task starts.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let config = &self.config;
        let settings = &config.settings;
        let symbols = config.symbol_names();

        let tracker = Arc::new(PositionTracker::new(
            config.exchange.quote_asset.clone(),
            symbols.clone(),
            config.risk.position_tolerance,
        ));
        let execution = Arc::new(ExecutionEngine::new(
            self.exchange.clone(),
            tracker.clone(),
            settings,
        ));
        let reconciler = Arc::new(Reconciler::new(
            self.exchange.clone(),
            tracker.clone(),
            execution.clone(),
            symbols.clone(),
        ));

        info!(venue = self.exchange.venue(), symbols = ?symbols, "Reconciling account before trading");
        initial_reconcile(&reconciler).await?;

        let risk = Arc::new(RiskManager::new(
            RiskLimits::from_config(config),
            FeeSchedule::from_config(&config.risk),
        ));

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let mut routes = HashMap::new();

        for symbol_config in &config.symbols {
            let symbol = symbol_config.symbol.clone();
            let mut signals = SignalEngine::new(
                symbol.clone(),
                build_strategy(&config.strategy)?,
                ChronoDuration::seconds(settings.market_staleness_seconds as i64),
            );
            if let Some(closes) = self.warmup.get(&symbol) {
                signals.warm_up(closes);
            }
            let pipeline = SymbolPipeline::new(
                signals,
                risk.clone(),
                execution.clone(),
                tracker.clone(),
                symbol_config.order_quantity,
            );
            let (tx, rx) = mpsc::channel(PIPELINE_CHANNEL_SIZE);
            routes.insert(symbol, tx);
            tasks.spawn(pipeline.run(rx, shutdown.clone()));
        }
        let routes: Routes = Arc::new(routes);

        let (market_tx, market_rx) = create_event_channel();
        for group in symbol_groups(&symbols, config.exchange.symbols_per_connection) {
            let feed = MarketDataFeed::new(self.stream.clone(), group, settings.reconnect_policy());
            tasks.spawn(feed.run(market_tx.clone(), shutdown.clone()));
        }
        drop(market_tx);

        tasks.spawn(route_events(
            market_rx,
            execution.subscribe(),
            Router::new(&routes),
            shutdown.clone(),
        ));
        tasks.spawn(strategy_timer(
            Duration::from_secs(settings.strategy_timer_seconds.max(1)),
            routes.clone(),
            shutdown.clone(),
        ));
        tasks.spawn(sync_orders(
            execution.clone(),
            Duration::from_secs(settings.order_sync_interval_seconds.max(1)),
            shutdown.clone(),
        ));
        let interval = Duration::from_secs(settings.reconciliation_interval_seconds.max(1));
        let reconcile_shutdown = shutdown.clone();
        tasks.spawn(async move { reconciler.run(interval, reconcile_shutdown).await });
        drop(routes);

        info!("Trading started");
        let mut outcome = Ok(());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_fatal() => {
                    error!(error = %err, "Fatal error, shutting down");
                    if outcome.is_ok() {
                        outcome = Err(err);
                    }
                    shutdown.cancel();
                }
                Ok(Err(err)) => warn!(error = %err, "Task ended with error"),
                Err(join_err) => {
                    error!(error = %join_err, "Task panicked, shutting down");
                    if outcome.is_ok() {
                        outcome = Err(ClientError::Internal(join_err.to_string()));
                    }
                    shutdown.cancel();
                }
            }
        }

        let view = tracker.view();
        info!(
            equity = %view.equity(),
            open_orders = view.open_orders.len(),
            "Coordinator stopped"
        );
        outcome
    }
}

/// Cancel `shutdown` once `signal` fires
///
/// A signal handler that cannot be installed is logged and trading goes on;
/// a fatal error still stops the coordinator.
pub async fn cancel_on_signal<F>(signal: F, shutdown: CancellationToken)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Received shutdown signal, cleaning up...");
            shutdown.cancel();
        }
        Err(err) => error!(error = %err, "Unable to listen for shutdown signal"),
    }
}

/// Feed market and order events to the pipelines without waiting on any one
async fn route_events(
    mut market: mpsc::Receiver<MarketEvent>,
    mut orders: broadcast::Receiver<OrderEvent>,
    mut router: Router,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut flush = tokio::time::interval(router::FLUSH_INTERVAL);
    flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut market_open = true;

    loop {
        let delivered = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            event = market.recv(), if market_open => match event {
                Some(event) => router.route_market(event),
                None => {
                    debug!("Market feeds finished");
                    market_open = false;
                    continue;
                }
            },
            event = orders.recv() => match event {
                Ok(event) => router.route_order(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Order event router lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            _ = flush.tick() => router.flush(),
        };
        if delivered.is_err() {
            debug!("Pipeline gone, router stopping");
            return Ok(());
        }
    }
}

async fn strategy_timer(period: Duration, routes: Routes, shutdown: CancellationToken) -> Result<()> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        for (symbol, route) in routes.iter() {
            // a busy pipeline simply skips this timer
            if let Err(mpsc::error::TrySendError::Closed(_)) = route.try_send(PipelineInput::Timer) {
                debug!(symbol = %symbol, "Pipeline gone, timer stopping");
                return Ok(());
            }
        }
    }
}

async fn sync_orders(
    execution: Arc<ExecutionEngine>,
    period: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        match execution.poll_open_orders().await {
            Ok(0) => {}
            Ok(changed) => debug!(changed, "Order sync applied updates"),
            Err(crate::execution::ExecutionError::Client(err)) if err.is_fatal() => return Err(err),
            Err(err) => warn!(error = %err, "Order sync failed"),
        }
    }
}
