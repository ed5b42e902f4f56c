//! Order execution engine
//!
//! Owns every non-terminal order. Submissions are keyed by a client order id
//! so a submission whose outcome is unknown can be looked up and, if the
//! exchange never saw it, resent under the same key.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, info, instrument, warn};

use super::idempotency::KeyGenerator;
use super::order::{ExecutionError, Fill, Order, OrderEvent};
use crate::common::channels::create_order_event_channel;
use crate::common::errors::ClientError;
use crate::common::traits::ExchangeApi;
use crate::common::types::{ExchangeOrder, OrderAck, OrderRequest, OrderStatus, OrderType};
use crate::config::types::AppSettings;
use crate::risk::SizedIntent;
use crate::tracker::PositionTracker;

/// Whether a submit failure leaves us unsure if the exchange accepted it
fn outcome_unknown(err: &ClientError) -> bool {
    err.is_indeterminate()
        || matches!(
            err,
            ClientError::JsonParse(_) | ClientError::InvalidResponse(_)
        )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ExecutionEngine {
    exchange: Arc<dyn ExchangeApi>,
    tracker: Arc<PositionTracker>,
    keys: Mutex<KeyGenerator>,
    orders: Mutex<HashMap<String, Order>>,
    /// Keys with a submit call outstanding
    in_flight: Mutex<HashSet<String>>,
    events: broadcast::Sender<OrderEvent>,
    reconcile: Arc<Notify>,
    max_resubmits: u32,
    order_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(exchange: Arc<dyn ExchangeApi>, tracker: Arc<PositionTracker>, settings: &AppSettings) -> Self {
        Self::with_limits(
            exchange,
            tracker,
            settings.max_resubmits,
            Duration::seconds(settings.order_timeout_seconds as i64),
        )
    }

    pub fn with_limits(
        exchange: Arc<dyn ExchangeApi>,
        tracker: Arc<PositionTracker>,
        max_resubmits: u32,
        order_timeout: Duration,
    ) -> Self {
        let (events, _) = create_order_event_channel();
        Self {
            exchange,
            tracker,
            keys: Mutex::new(KeyGenerator::default()),
            orders: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            events,
            reconcile: Arc::new(Notify::new()),
            max_resubmits,
            order_timeout,
        }
    }

    /// Terminal order transitions
    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.events.subscribe()
    }

    /// Signalled whenever a submission outcome could not be determined
    pub fn reconcile_requests(&self) -> Arc<Notify> {
        self.reconcile.clone()
    }

    pub fn tracker(&self) -> &Arc<PositionTracker> {
        &self.tracker
    }

    /// Current record for `key`, open or terminal
    pub fn order(&self, key: &str) -> Option<Order> {
        lock(&self.orders)
            .get(key)
            .cloned()
            .or_else(|| self.tracker.historical_order(key))
    }

    pub fn open_orders(&self) -> Vec<Order> {
        lock(&self.orders).values().cloned().collect()
    }

    pub fn next_key(&self) -> String {
        lock(&self.keys).next_key()
    }

    /// Create and submit an order for an approved intent
    pub async fn execute(&self, sized: &SizedIntent) -> Result<Order, ExecutionError> {
        let key = self.next_key();
        let order = Order::from_intent(key, sized, Utc::now());
        self.submit(order).await
    }

    /// Submit `order` under its key
    ///
    /// A key that is already known returns its recorded state without
    /// contacting the exchange. A key that was used before but whose record
    /// has aged out of the history fails with `DuplicateKey`.
    #[instrument(skip(self, order), fields(key = %order.key, symbol = %order.symbol))]
    pub async fn submit(&self, order: Order) -> Result<Order, ExecutionError> {
        let key = order.key.clone();
        {
            let mut orders = lock(&self.orders);
            if let Some(known) = orders.get(&key) {
                debug!("Key already known, returning recorded outcome");
                return Ok(known.clone());
            }
            if let Some(known) = self.tracker.historical_order(&key) {
                debug!("Key already known, returning recorded outcome");
                return Ok(known);
            }
            if let Err(err) = lock(&self.keys).claim(&key) {
                warn!("Key was used before and its record is gone, refusing to resubmit");
                return Err(err);
            }
            orders.insert(key.clone(), order.clone());
            lock(&self.in_flight).insert(key.clone());
        }

        let request = order.to_request();
        let order_type = order.order_type;
        self.tracker.record_order(&order);

        let result = self.submit_with_recovery(&key, &request, order_type).await;
        lock(&self.in_flight).remove(&key);
        result
    }

    async fn submit_with_recovery(
        &self,
        key: &str,
        request: &OrderRequest,
        order_type: OrderType,
    ) -> Result<Order, ExecutionError> {
        let mut resubmits = 0;
        loop {
            let err = match self.exchange.submit_order(request).await {
                Ok(ack) => return self.on_ack(key, &request.symbol, ack, order_type).await,
                Err(err) => err,
            };

            if !outcome_unknown(&err) {
                warn!(key, error = %err, "Order submission refused");
                let order = self.reject_pending(key, err.to_string())?;
                if err.is_fatal() {
                    return Err(err.into());
                }
                return Ok(order);
            }

            warn!(key, error = %err, "Submission outcome unknown, querying by key");
            match self.exchange.query_order(&request.symbol, key).await {
                Ok(remote) => {
                    info!(key, exchange_order_id = %remote.exchange_order_id, "Exchange has the order, adopting");
                    return self.resolve_remote(key, &remote);
                }
                Err(ClientError::NotFound(_)) if resubmits < self.max_resubmits => {
                    resubmits += 1;
                    info!(key, attempt = resubmits, "Exchange never saw the order, resubmitting");
                }
                Err(query_err) => {
                    let reason = match query_err {
                        ClientError::NotFound(_) => {
                            format!("not accepted after {} resubmissions", resubmits)
                        }
                        other => format!("status query failed: {}", other),
                    };
                    warn!(key, %reason, "Requesting reconciliation");
                    self.reconcile.notify_one();
                    return Err(ExecutionError::Discrepancy {
                        key: key.to_string(),
                        reason,
                    });
                }
            }
        }
    }

    async fn on_ack(
        &self,
        key: &str,
        symbol: &str,
        ack: OrderAck,
        order_type: OrderType,
    ) -> Result<Order, ExecutionError> {
        let order = {
            let mut orders = lock(&self.orders);
            let order = orders
                .get_mut(key)
                .ok_or_else(|| ExecutionError::UnknownOrder(key.to_string()))?;
            order.exchange_order_id = Some(ack.exchange_order_id.clone());
            order.transition(OrderStatus::Submitted, Utc::now())?;
            order.clone()
        };
        info!(key, exchange_order_id = %ack.exchange_order_id, "Order acknowledged");
        self.commit(order.clone(), None, OrderStatus::Pending);

        // market orders usually fill at once; pick the fill up now
        if order_type == OrderType::Market {
            match self.exchange.query_order(symbol, key).await {
                Ok(remote) => return self.resolve_remote(key, &remote),
                Err(err) => debug!(key, error = %err, "Post-ack status query failed, sync will retry"),
            }
        }
        Ok(order)
    }

    fn reject_pending(&self, key: &str, reason: String) -> Result<Order, ExecutionError> {
        let order = {
            let mut orders = lock(&self.orders);
            let order = orders
                .get_mut(key)
                .ok_or_else(|| ExecutionError::UnknownOrder(key.to_string()))?;
            order.reject(reason, Utc::now())?;
            order.clone()
        };
        self.commit(order.clone(), None, OrderStatus::Pending);
        Ok(order)
    }

    /// Bring a local order in line with the exchange's report
    fn resolve_remote(&self, key: &str, remote: &ExchangeOrder) -> Result<Order, ExecutionError> {
        let (order, fill, previous) = {
            let mut orders = lock(&self.orders);
            let order = orders
                .get_mut(key)
                .ok_or_else(|| ExecutionError::UnknownOrder(key.to_string()))?;
            let previous = order.status;
            let fill = order.apply_exchange_state(remote, Utc::now())?;
            (order.clone(), fill, previous)
        };
        self.commit(order.clone(), fill, previous);
        Ok(order)
    }

    /// Apply a status query result for `key`
    ///
    /// `NotFound` rejects an order the exchange never acknowledged and
    /// expires a submitted one once `order_timeout` has passed without a
    /// terminal update.
    pub fn resolve_order(
        &self,
        key: &str,
        result: Result<ExchangeOrder, ClientError>,
    ) -> Result<Option<Order>, ExecutionError> {
        match result {
            Ok(remote) => self.resolve_remote(key, &remote).map(Some),
            Err(ClientError::NotFound(_)) => self.settle_unknown(key, Utc::now()),
            Err(err) => Err(err.into()),
        }
    }

    fn settle_unknown(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Order>, ExecutionError> {
        if lock(&self.in_flight).contains(key) {
            return Ok(None);
        }
        let (order, previous) = {
            let mut orders = lock(&self.orders);
            let Some(order) = orders.get_mut(key) else {
                return Ok(None);
            };
            let previous = order.status;
            let overdue = now - order.updated_at >= self.order_timeout;
            match order.status {
                OrderStatus::Pending => order.reject("unknown to the exchange", now)?,
                OrderStatus::Submitted if overdue => order.transition(OrderStatus::Expired, now)?,
                OrderStatus::PartiallyFilled if overdue => {
                    order.transition(OrderStatus::Cancelled, now)?
                }
                _ => return Ok(None),
            }
            (order.clone(), previous)
        };
        info!(key, from = %previous, to = %order.status, "Order unknown to exchange, settled locally");
        self.commit(order.clone(), None, previous);
        Ok(Some(order))
    }

    /// Mirror to the tracker, broadcast terminal transitions, drop finished orders
    fn commit(&self, order: Order, fill: Option<Fill>, previous: OrderStatus) {
        if let Some(fill) = &fill {
            self.tracker.apply_fill(&order.symbol, order.side, fill);
        }
        self.tracker.record_order(&order);

        if order.is_terminal() {
            lock(&self.orders).remove(&order.key);
            if previous != order.status {
                info!(
                    key = %order.key,
                    symbol = %order.symbol,
                    status = %order.status,
                    filled = %order.filled_quantity(),
                    "Order finished"
                );
                // no subscribers is fine
                let _ = self.events.send(OrderEvent::from(&order));
            }
        }
    }

    /// Take over an open order the exchange reports but we do not know
    ///
    /// Returns the key it is tracked under. Its executed quantity is already
    /// part of the exchange's positions and is not applied to the tracker.
    pub fn adopt_external(&self, remote: &ExchangeOrder) -> Result<String, ExecutionError> {
        let key = if remote.client_order_id.is_empty() {
            format!("ext-{}", remote.exchange_order_id)
        } else {
            remote.client_order_id.clone()
        };
        if lock(&self.orders).contains_key(&key) {
            return Ok(key);
        }
        if lock(&self.keys).claim(&key).is_err() {
            debug!(key = %key, "Adopting an order under a key used by this process");
        }

        let order = Order::from_exchange(key.clone(), remote);
        info!(
            key = %key,
            symbol = %order.symbol,
            status = %order.status,
            "Adopted exchange order"
        );
        lock(&self.orders).insert(key.clone(), order.clone());
        self.commit(order, None, remote.status);
        Ok(key)
    }

    /// Query every acknowledged open order and apply the results
    ///
    /// Returns how many orders changed status.
    pub async fn poll_open_orders(&self) -> Result<usize, ExecutionError> {
        let open: Vec<(String, String, OrderStatus)> = lock(&self.orders)
            .values()
            .filter(|o| o.status != OrderStatus::Pending)
            .map(|o| (o.key.clone(), o.symbol.clone(), o.status))
            .collect();

        let mut changed = 0;
        for (key, symbol, before) in open {
            let result = match self.exchange.query_order(&symbol, &key).await {
                Err(err) if err.is_fatal() => return Err(err.into()),
                other => other,
            };
            match self.resolve_order(&key, result) {
                Ok(Some(order)) if order.status != before => changed += 1,
                Ok(_) => {}
                Err(err) => warn!(key = %key, error = %err, "Order sync failed"),
            }
        }
        Ok(changed)
    }

    /// Cancel by key
    ///
    /// Cancelling a terminal order succeeds without contacting the exchange.
    #[instrument(skip(self))]
    pub async fn cancel(&self, key: &str) -> Result<Order, ExecutionError> {
        let order = self
            .order(key)
            .ok_or_else(|| ExecutionError::UnknownOrder(key.to_string()))?;
        if order.is_terminal() {
            return Ok(order);
        }
        if order.status == OrderStatus::Pending {
            return Err(ExecutionError::NotSubmitted(key.to_string()));
        }

        match self.exchange.cancel_order(&order.symbol, key).await {
            Ok(()) => match self.exchange.query_order(&order.symbol, key).await {
                Ok(remote) => self.resolve_remote(key, &remote),
                Err(err) => {
                    debug!(key, error = %err, "Status query after cancel failed, marking cancelled");
                    let (order, previous) = {
                        let mut orders = lock(&self.orders);
                        let order = orders
                            .get_mut(key)
                            .ok_or_else(|| ExecutionError::UnknownOrder(key.to_string()))?;
                        let previous = order.status;
                        order.transition(OrderStatus::Cancelled, Utc::now())?;
                        (order.clone(), previous)
                    };
                    self.commit(order.clone(), None, previous);
                    Ok(order)
                }
            },
            Err(ClientError::AlreadyTerminal(_)) | Err(ClientError::NotFound(_)) => {
                let result = self.exchange.query_order(&order.symbol, key).await;
                Ok(self.resolve_order(key, result)?.unwrap_or(order))
            }
            Err(err) => Err(err.into()),
        }
    }
}
