//! Reconnecting market data feed
//!
//! Wraps a [`MarketStream`] transport: each session runs until it fails, the
//! feed then marks every symbol of the group with a `Gap`, backs off and starts
//! a new session. Ticks that do not advance a symbol's clock are dropped.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::common::channels::DEFAULT_CHANNEL_SIZE;
use crate::common::errors::Result;
use crate::common::retry::RetryPolicy;
use crate::common::traits::MarketStream;
use crate::common::types::{ConnectionStatus, MarketEvent, Tick};

/// Split symbols into groups served by one connection each
pub fn symbol_groups(symbols: &[String], per_connection: usize) -> Vec<Vec<String>> {
    symbols
        .chunks(per_connection.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Per-symbol monotonic timestamp filter
#[derive(Debug, Default)]
pub struct TickFilter {
    last_accepted: HashMap<String, DateTime<Utc>>,
}

impl TickFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the tick only if it is strictly newer than the last accepted one
    pub fn accept(&mut self, tick: &Tick) -> bool {
        match self.last_accepted.get(&tick.symbol) {
            Some(last) if tick.timestamp <= *last => false,
            _ => {
                self.last_accepted
                    .insert(tick.symbol.clone(), tick.timestamp);
                true
            }
        }
    }

    pub fn last_accepted(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_accepted.get(symbol).copied()
    }
}

/// Supervises the streaming sessions of one symbol group
pub struct MarketDataFeed {
    stream: Arc<dyn MarketStream>,
    symbols: Vec<String>,
    reconnect: RetryPolicy,
    filter: TickFilter,
}

impl MarketDataFeed {
    pub fn new(stream: Arc<dyn MarketStream>, symbols: Vec<String>, reconnect: RetryPolicy) -> Self {
        Self {
            stream,
            symbols,
            reconnect,
            filter: TickFilter::new(),
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Run until `shutdown` fires or reconnect attempts are exhausted
    ///
    /// Returns `Ok` on shutdown (or when the consumer went away) and the last
    /// session error when the reconnect policy gives up.
    #[instrument(skip_all, fields(venue = self.stream.venue(), symbols = ?self.symbols))]
    pub async fn run(
        mut self,
        sender: mpsc::Sender<MarketEvent>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let mut backoff = self.reconnect.backoff();
        let symbols = self.symbols.clone();

        loop {
            let (raw_tx, mut raw_rx) = mpsc::channel(DEFAULT_CHANNEL_SIZE);
            let stream = self.stream.clone();
            let session = stream.run_session(&symbols, raw_tx, shutdown.child_token());
            tokio::pin!(session);

            let mut received_ticks = false;
            let outcome = loop {
                tokio::select! {
                    result = &mut session => break result,
                    Some(event) = raw_rx.recv() => {
                        received_ticks |= matches!(event, MarketEvent::Tick(_));
                        if !self.forward(event, &sender).await {
                            return Ok(());
                        }
                    }
                }
            };

            // events buffered before the session returned
            while let Ok(event) = raw_rx.try_recv() {
                received_ticks |= matches!(event, MarketEvent::Tick(_));
                if !self.forward(event, &sender).await {
                    return Ok(());
                }
            }

            let err = match outcome {
                Ok(()) => {
                    info!("Market stream closed");
                    return Ok(());
                }
                Err(e) => e,
            };

            if shutdown.is_cancelled() {
                return Ok(());
            }

            warn!(error = %err, "Market stream disconnected");
            for symbol in &symbols {
                let gap = MarketEvent::Gap {
                    symbol: symbol.clone(),
                    reason: err.to_string(),
                };
                if sender.send(gap).await.is_err() {
                    return Ok(());
                }
            }

            if received_ticks {
                backoff.reset();
            }
            let Some(delay) = backoff.next_backoff() else {
                warn!(attempts = backoff.attempts(), "Giving up reconnecting");
                let _ = sender
                    .send(MarketEvent::ConnectionStatus {
                        status: ConnectionStatus::Error(err.to_string()),
                    })
                    .await;
                return Err(err);
            };

            let _ = sender
                .send(MarketEvent::ConnectionStatus {
                    status: ConnectionStatus::Reconnecting {
                        attempt: backoff.attempts(),
                    },
                })
                .await;
            debug!(delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Filter and forward one event. Returns false once the consumer is gone.
    async fn forward(&mut self, event: MarketEvent, sender: &mpsc::Sender<MarketEvent>) -> bool {
        if let MarketEvent::Tick(tick) = &event {
            if !self.filter.accept(tick) {
                debug!(symbol = %tick.symbol, timestamp = %tick.timestamp, "Dropping stale tick");
                return true;
            }
        }
        sender.send(event).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::errors::ClientError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn tick(symbol: &str, ms: i64) -> MarketEvent {
        MarketEvent::Tick(Tick {
            symbol: symbol.to_string(),
            timestamp: Utc.timestamp_millis_opt(ms).unwrap(),
            best_bid: dec!(99),
            best_ask: dec!(101),
            last_price: dec!(100),
            depth: None,
        })
    }

    /// Each session replays a script, then fails or waits for shutdown
    struct ScriptedStream {
        sessions: Mutex<VecDeque<(Vec<MarketEvent>, bool)>>,
    }

    #[async_trait]
    impl MarketStream for ScriptedStream {
        async fn run_session(
            &self,
            _symbols: &[String],
            sender: mpsc::Sender<MarketEvent>,
            shutdown: CancellationToken,
        ) -> Result<()> {
            let next = self.sessions.lock().unwrap().pop_front();
            let Some((events, disconnect)) = next else {
                shutdown.cancelled().await;
                return Ok(());
            };
            for event in events {
                sender.send(event).await.unwrap();
            }
            if disconnect {
                Err(ClientError::WebSocketConnection("reset by peer".to_string()))
            } else {
                shutdown.cancelled().await;
                Ok(())
            }
        }

        fn venue(&self) -> &'static str {
            "scripted"
        }
    }

    #[test]
    fn test_filter_drops_non_increasing_timestamps() {
        let mut filter = TickFilter::new();
        let MarketEvent::Tick(t1) = tick("BTC-USDT", 1_000) else { unreachable!() };
        let MarketEvent::Tick(t0) = tick("BTC-USDT", 900) else { unreachable!() };
        let MarketEvent::Tick(other) = tick("ETH-USDT", 900) else { unreachable!() };

        assert!(filter.accept(&t1));
        assert!(!filter.accept(&t1));
        assert!(!filter.accept(&t0));
        assert!(filter.accept(&other));
    }

    #[test]
    fn test_symbol_groups() {
        let symbols: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let groups = symbol_groups(&symbols, 2);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1], vec!["C".to_string()]);
    }

    #[tokio::test]
    async fn test_disconnect_emits_gap_and_resumes() {
        let stream = Arc::new(ScriptedStream {
            sessions: Mutex::new(VecDeque::from(vec![
                (vec![tick("BTC-USDT", 1_000), tick("BTC-USDT", 1_000)], true),
                (vec![tick("BTC-USDT", 900), tick("BTC-USDT", 2_000)], false),
            ])),
        });
        let feed = MarketDataFeed::new(
            stream,
            vec!["BTC-USDT".to_string()],
            RetryPolicy::immediate(5),
        );
        let (tx, mut rx) = mpsc::channel(64);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(feed.run(tx, shutdown.clone()));

        let mut seen = Vec::new();
        while seen.len() < 3 {
            match rx.recv().await.unwrap() {
                MarketEvent::Tick(t) => seen.push(format!("tick:{}", t.timestamp.timestamp_millis())),
                MarketEvent::Gap { symbol, .. } => seen.push(format!("gap:{}", symbol)),
                _ => {}
            }
        }
        assert_eq!(seen, vec!["tick:1000", "gap:BTC-USDT", "tick:2000"]);

        shutdown.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_gives_up_after_reconnect_budget() {
        let stream = Arc::new(ScriptedStream {
            sessions: Mutex::new(VecDeque::from(vec![
                (vec![], true),
                (vec![], true),
                (vec![], true),
            ])),
        });
        let feed = MarketDataFeed::new(
            stream,
            vec!["ETH-USDT".to_string()],
            RetryPolicy::immediate(2),
        );
        let (tx, mut rx) = mpsc::channel(64);
        let result = feed.run(tx, CancellationToken::new()).await;
        assert!(matches!(result, Err(ClientError::WebSocketConnection(_))));

        let mut gaps = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, MarketEvent::Gap { .. }) {
                gaps += 1;
            }
        }
        assert_eq!(gaps, 2);
    }
}
