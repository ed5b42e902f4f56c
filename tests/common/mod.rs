//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use bingx_trader::common::errors::{ClientError, Result};
use bingx_trader::common::retry::RetryPolicy;
use bingx_trader::common::traits::{ExchangeApi, MarketStream};
use bingx_trader::common::types::{
    AccountSnapshot, Balance, ExchangeOrder, ExchangePosition, MarketEvent, OrderAck, OrderRequest,
    OrderStatus, Tick,
};
use bingx_trader::config::types::{AppConfig, ExchangeConfig, SymbolConfig};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const SYMBOL: &str = "BTC-USDT";

/// Exchange config pointed at a mock server, with fast retries
pub fn exchange_config(base_url: &str) -> ExchangeConfig {
    ExchangeConfig {
        rest_url: base_url.to_string(),
        requests_per_second: 1000,
        request_burst: 1000,
        retry: RetryPolicy::immediate(3),
        ..ExchangeConfig::default()
    }
}

/// One-symbol application config
pub fn app_config() -> AppConfig {
    let mut symbol = SymbolConfig::new(SYMBOL, "BTC", dec!(0.01), dec!(0.05));
    symbol.qty_precision = 4;
    AppConfig {
        exchange: ExchangeConfig::default(),
        symbols: vec![symbol],
        risk: Default::default(),
        strategy: Default::default(),
        settings: Default::default(),
    }
}

pub fn tick(price: Decimal, at: DateTime<Utc>) -> Tick {
    Tick {
        symbol: SYMBOL.to_string(),
        timestamp: at,
        best_bid: price,
        best_ask: price,
        last_price: price,
        depth: None,
    }
}

pub fn snapshot(usdt: Decimal, positions: Vec<(&str, Decimal, Decimal)>) -> AccountSnapshot {
    let mut balances = HashMap::new();
    balances.insert("USDT".to_string(), Balance::new("USDT", usdt, Decimal::ZERO));
    AccountSnapshot {
        balances,
        open_orders: Vec::new(),
        positions: positions
            .into_iter()
            .map(|(symbol, quantity, entry_price)| ExchangePosition {
                symbol: symbol.to_string(),
                quantity,
                entry_price,
            })
            .collect(),
        fetched_at: Utc::now(),
    }
}

/// Scripted outcome of one `submit_order` call
#[derive(Debug, Clone)]
pub enum SubmitScript {
    /// Accepted and filled at the given price
    Fill(Decimal),
    /// Accepted but the response was lost
    AcceptThenTimeout(Decimal),
    /// Never reached the exchange
    Timeout,
    /// Accepted and filled at the given price after a delay
    Slow(std::time::Duration, Decimal),
    /// Credentials refused
    Unauthorized,
    /// The call itself panics
    Panic,
    Reject(i64, &'static str),
}

/// In-memory exchange that records every call
///
/// Orders are stored by client order id, so a duplicate submission under the
/// same key is visible in `orders_for`.
#[derive(Default)]
pub struct MockExchange {
    pub snapshot: Mutex<Option<AccountSnapshot>>,
    pub submits: Mutex<VecDeque<SubmitScript>>,
    pub submitted: Mutex<Vec<OrderRequest>>,
    pub orders: Mutex<HashMap<String, ExchangeOrder>>,
    pub fetch_fails: Mutex<bool>,
    /// Keys passed to `query_order`, in call order
    pub queried: Mutex<Vec<String>>,
    next_id: Mutex<u64>,
}

impl MockExchange {
    pub fn new(snapshot: AccountSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            ..Self::default()
        }
    }

    pub fn script(&self, steps: Vec<SubmitScript>) {
        self.submits.lock().unwrap().extend(steps);
    }

    pub fn submissions(&self) -> Vec<OrderRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn orders_for(&self, key: &str) -> usize {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.client_order_id == key)
            .count()
    }

    fn record(&self, request: &OrderRequest, price: Decimal) -> String {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let id = next.to_string();
        let order = ExchangeOrder {
            exchange_order_id: id.clone(),
            client_order_id: request.client_order_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.price,
            status: OrderStatus::Filled,
            executed_quantity: request.quantity,
            average_price: price,
            commission: request.quantity * price * dec!(0.0005),
            updated_at: Utc::now(),
        };
        self.orders
            .lock()
            .unwrap()
            .insert(request.client_order_id.clone(), order);
        id
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        let step = self
            .submits
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SubmitScript::Fill(request.price.unwrap_or(dec!(50000))));
        match step {
            SubmitScript::Fill(price) => {
                self.submitted.lock().unwrap().push(request.clone());
                let id = self.record(request, price);
                Ok(OrderAck {
                    exchange_order_id: id,
                    client_order_id: request.client_order_id.clone(),
                })
            }
            SubmitScript::Slow(delay, price) => {
                tokio::time::sleep(delay).await;
                self.submitted.lock().unwrap().push(request.clone());
                let id = self.record(request, price);
                Ok(OrderAck {
                    exchange_order_id: id,
                    client_order_id: request.client_order_id.clone(),
                })
            }
            SubmitScript::AcceptThenTimeout(price) => {
                self.submitted.lock().unwrap().push(request.clone());
                self.record(request, price);
                Err(ClientError::Network {
                    message: "operation timed out".to_string(),
                    attempts: 3,
                })
            }
            SubmitScript::Timeout => Err(ClientError::Network {
                message: "connection reset".to_string(),
                attempts: 3,
            }),
            SubmitScript::Reject(code, reason) => Err(ClientError::Rejected {
                code,
                reason: reason.to_string(),
            }),
            SubmitScript::Unauthorized => {
                Err(ClientError::Authentication("HTTP 401: invalid api key".to_string()))
            }
            SubmitScript::Panic => panic!("scripted exchange failure"),
        }
    }

    async fn cancel_order(&self, _symbol: &str, client_order_id: &str) -> Result<()> {
        match self.orders.lock().unwrap().get(client_order_id) {
            Some(order) if order.status.is_terminal() => {
                Err(ClientError::AlreadyTerminal(client_order_id.to_string()))
            }
            Some(_) => Ok(()),
            None => Err(ClientError::NotFound(client_order_id.to_string())),
        }
    }

    async fn query_order(&self, _symbol: &str, client_order_id: &str) -> Result<ExchangeOrder> {
        self.queried.lock().unwrap().push(client_order_id.to_string());
        self.orders
            .lock()
            .unwrap()
            .get(client_order_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(client_order_id.to_string()))
    }

    async fn fetch_account_snapshot(&self, _symbols: &[String]) -> Result<AccountSnapshot> {
        if *self.fetch_fails.lock().unwrap() {
            return Err(ClientError::Network {
                message: "snapshot unavailable".to_string(),
                attempts: 3,
            });
        }
        let mut snapshot = self
            .snapshot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ClientError::Internal("no snapshot scripted".to_string()))?;
        snapshot.fetched_at = Utc::now();
        Ok(snapshot)
    }

    fn venue(&self) -> &'static str {
        "mock"
    }
}

/// Market stream that replays scripted sessions
///
/// A session ending in `true` drops the connection after its events.
pub struct ScriptedStream {
    sessions: Mutex<VecDeque<(Vec<MarketEvent>, bool)>>,
}

impl ScriptedStream {
    pub fn new(sessions: Vec<(Vec<MarketEvent>, bool)>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
        }
    }

    /// Sessions not yet started
    pub fn remaining(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
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
            if sender.send(event).await.is_err() {
                return Ok(());
            }
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
