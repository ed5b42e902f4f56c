//! Authoritative local account state, published as immutable views

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::position::Position;
use crate::common::types::{AccountSnapshot, Balance, ExchangeOrder, Side, Tick};
use crate::execution::order::{Fill, Order};

/// Terminal orders kept for inspection
const ORDER_HISTORY_LIMIT: usize = 1000;

/// Immutable snapshot of everything the tracker knows
#[derive(Debug, Clone, Default)]
pub struct StateView {
    pub quote_asset: String,
    pub balances: HashMap<String, Balance>,
    pub positions: HashMap<String, Position>,
    /// Non-terminal orders by idempotency key
    pub open_orders: HashMap<String, Order>,
    /// Fetch time of the snapshot currently in force
    pub snapshot_at: Option<DateTime<Utc>>,
    /// Set when the latest fetch failed; the previous snapshot stays in force
    pub stale_reason: Option<String>,
    /// New submissions are blocked after repeated divergence
    pub trading_blocked: bool,
    pub version: u64,
}

impl StateView {
    /// Age of the snapshot in force, `None` if never reconciled
    pub fn snapshot_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.snapshot_at.map(|at| now - at)
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn position_quantity(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or_default()
    }

    pub fn quote_balance(&self) -> Option<&Balance> {
        self.balances.get(&self.quote_asset)
    }

    pub fn free_quote(&self) -> Decimal {
        self.quote_balance().map(|b| b.free).unwrap_or_default()
    }

    /// Quote held back for open orders that may still open exposure
    pub fn reserved_quote(&self) -> Decimal {
        self.open_orders
            .values()
            .filter(|o| !o.reducing)
            .map(Order::remaining_notional)
            .sum()
    }

    /// Free quote minus what open orders will consume
    pub fn available_quote(&self) -> Decimal {
        self.free_quote() - self.reserved_quote()
    }

    /// Remaining quantity of open non-reducing orders on one side
    pub fn pending_quantity(&self, symbol: &str, side: Side) -> Decimal {
        self.open_orders
            .values()
            .filter(|o| o.symbol == symbol && o.side == side && !o.reducing)
            .map(Order::remaining_quantity)
            .sum()
    }

    pub fn pending_notional(&self) -> Decimal {
        self.reserved_quote()
    }

    /// Whether a reducing order is already working for `symbol`
    pub fn has_pending_close(&self, symbol: &str) -> bool {
        self.open_orders
            .values()
            .any(|o| o.symbol == symbol && o.reducing)
    }

    pub fn has_open_orders(&self, symbol: &str) -> bool {
        self.open_orders.values().any(|o| o.symbol == symbol)
    }

    /// Quote balance plus unrealized P&L of all positions
    pub fn equity(&self) -> Decimal {
        let cash = self.quote_balance().map(Balance::total).unwrap_or_default();
        cash + self
            .positions
            .values()
            .map(Position::unrealized_pnl)
            .sum::<Decimal>()
    }

    /// Sum of absolute marked position notionals
    pub fn marked_exposure(&self) -> Decimal {
        self.positions.values().map(Position::notional).sum()
    }
}

/// Work the reconciler must do before a snapshot can be compared
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationPlan {
    /// Exchange open orders unknown locally
    pub imported: Vec<ExchangeOrder>,
    /// Local non-terminal orders absent from the exchange's open orders: (symbol, key)
    pub missing: Vec<(String, String)>,
}

/// Result of comparing local positions with a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Local and exchange agree; baseline refreshed
    Clean,
    /// First disagreement; nothing adopted, fetch again now
    Diverged { symbols: Vec<String> },
    /// Repeated disagreement; exchange truth adopted and trading blocked
    Adopted { symbols: Vec<String> },
}

#[derive(Debug, Default)]
struct TrackerState {
    balances: HashMap<String, Balance>,
    positions: HashMap<String, Position>,
    open_orders: HashMap<String, Order>,
    history: VecDeque<Order>,
    snapshot_at: Option<DateTime<Utc>>,
    stale_reason: Option<String>,
    diverged_cycles: u32,
    trading_blocked: bool,
    version: u64,
}

/// Position & account state tracker
///
/// All mutation goes through `&self` methods that take a short synchronous
/// lock and then publish a fresh [`StateView`].
pub struct PositionTracker {
    quote_asset: String,
    symbols: Vec<String>,
    tolerance: Decimal,
    state: Mutex<TrackerState>,
    publisher: watch::Sender<Arc<StateView>>,
}

impl PositionTracker {
    pub fn new(quote_asset: impl Into<String>, symbols: Vec<String>, tolerance: Decimal) -> Self {
        let quote_asset = quote_asset.into();
        let mut state = TrackerState::default();
        for symbol in &symbols {
            state
                .positions
                .insert(symbol.clone(), Position::new(symbol.clone()));
        }
        let initial = StateView {
            quote_asset: quote_asset.clone(),
            positions: state.positions.clone(),
            ..StateView::default()
        };
        let (publisher, _) = watch::channel(Arc::new(initial));

        Self {
            quote_asset,
            symbols,
            tolerance,
            state: Mutex::new(state),
            publisher,
        }
    }

    /// Latest published view
    pub fn view(&self) -> Arc<StateView> {
        self.publisher.borrow().clone()
    }

    /// Receive every published view
    pub fn subscribe(&self) -> watch::Receiver<Arc<StateView>> {
        self.publisher.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // a panic while holding the lock leaves plain data behind; keep going
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &mut TrackerState) {
        state.version += 1;
        let view = StateView {
            quote_asset: self.quote_asset.clone(),
            balances: state.balances.clone(),
            positions: state.positions.clone(),
            open_orders: state.open_orders.clone(),
            snapshot_at: state.snapshot_at,
            stale_reason: state.stale_reason.clone(),
            trading_blocked: state.trading_blocked,
            version: state.version,
        };
        self.publisher.send_replace(Arc::new(view));
    }

    /// Apply one fill to the position and the local quote balance
    ///
    /// Opening quantity moves its notional plus fee out of free balance into
    /// locked; closing quantity returns its entry notional plus realized P&L.
    pub fn apply_fill(&self, symbol: &str, side: Side, fill: &Fill) {
        let mut state = self.lock();
        let effect = state
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::new(symbol))
            .apply_fill(side, fill.quantity, fill.price);

        let balance = state
            .balances
            .entry(self.quote_asset.clone())
            .or_insert_with(|| Balance::new(self.quote_asset.clone(), Decimal::ZERO, Decimal::ZERO));
        let released = effect.released_notional.min(balance.locked);
        balance.locked = balance.locked - released + effect.opened_notional;
        balance.free = balance.free + released + effect.realized_pnl
            - effect.opened_notional
            - fill.fee;

        debug!(
            symbol,
            %side,
            quantity = %fill.quantity,
            price = %fill.price,
            realized = %effect.realized_pnl,
            "Fill applied"
        );
        self.publish(&mut state);
    }

    /// Update mark prices from the latest tick
    pub fn mark_to_market(&self, tick: &Tick) {
        let mut state = self.lock();
        let Some(position) = state.positions.get_mut(&tick.symbol) else {
            return;
        };
        let price = if tick.last_price > Decimal::ZERO {
            tick.last_price
        } else {
            tick.midpoint()
        };
        if position.mark_price == Some(price) {
            return;
        }
        position.mark_price = Some(price);
        self.publish(&mut state);
    }

    /// Mirror an order owned by the execution engine
    pub fn record_order(&self, order: &Order) {
        let mut state = self.lock();
        if order.is_terminal() {
            state.open_orders.remove(&order.key);
            state.history.push_back(order.clone());
            while state.history.len() > ORDER_HISTORY_LIMIT {
                state.history.pop_front();
            }
        } else {
            state.open_orders.insert(order.key.clone(), order.clone());
        }
        self.publish(&mut state);
    }

    /// Terminal orders, oldest first
    pub fn order_history(&self) -> Vec<Order> {
        self.lock().history.iter().cloned().collect()
    }

    /// Most recent terminal record for `key`
    pub fn historical_order(&self, key: &str) -> Option<Order> {
        self.lock().history.iter().rev().find(|o| o.key == key).cloned()
    }

    /// Work out which orders need importing or querying before comparison
    pub fn plan_reconciliation(&self, snapshot: &AccountSnapshot) -> ReconciliationPlan {
        let state = self.lock();

        let remote_keys: HashSet<&str> = snapshot
            .open_orders
            .iter()
            .map(|o| o.client_order_id.as_str())
            .collect();
        let remote_ids: HashSet<&str> = snapshot
            .open_orders
            .iter()
            .map(|o| o.exchange_order_id.as_str())
            .collect();

        let known_ids: HashSet<&str> = state
            .open_orders
            .values()
            .filter_map(|o| o.exchange_order_id.as_deref())
            .collect();

        let imported = snapshot
            .open_orders
            .iter()
            .filter(|remote| {
                !state.open_orders.contains_key(&remote.client_order_id)
                    && !known_ids.contains(remote.exchange_order_id.as_str())
            })
            .cloned()
            .collect();

        let missing = state
            .open_orders
            .values()
            .filter(|local| {
                !remote_keys.contains(local.key.as_str())
                    && !local
                        .exchange_order_id
                        .as_deref()
                        .map(|id| remote_ids.contains(id))
                        .unwrap_or(false)
            })
            .map(|local| (local.symbol.clone(), local.key.clone()))
            .collect();

        ReconciliationPlan { imported, missing }
    }

    /// Compare positions with the snapshot and refresh or adopt the baseline
    pub fn complete_reconciliation(
        &self,
        snapshot: &AccountSnapshot,
        now: DateTime<Utc>,
    ) -> ReconcileOutcome {
        let mut state = self.lock();

        // nothing local to compare against yet: the first snapshot is the baseline
        if state.snapshot_at.is_none() {
            info!(
                positions = snapshot.positions.len(),
                open_orders = snapshot.open_orders.len(),
                "Initial account snapshot adopted"
            );
            self.adopt_snapshot(&mut state, snapshot);
            state.snapshot_at = Some(snapshot.fetched_at.min(now));
            state.stale_reason = None;
            self.publish(&mut state);
            return ReconcileOutcome::Clean;
        }

        let mut diverged: Vec<String> = self
            .symbols
            .iter()
            .filter(|symbol| {
                let local = state
                    .positions
                    .get(*symbol)
                    .map(|p| p.quantity)
                    .unwrap_or_default();
                let remote = snapshot
                    .position(symbol)
                    .map(|p| p.quantity)
                    .unwrap_or_default();
                (local - remote).abs() > self.tolerance
            })
            .cloned()
            .collect();
        diverged.sort();

        let outcome = if diverged.is_empty() {
            if state.trading_blocked {
                info!("Positions agree again, unblocking trading");
            }
            state.diverged_cycles = 0;
            state.trading_blocked = false;
            ReconcileOutcome::Clean
        } else {
            state.diverged_cycles += 1;
            if state.diverged_cycles < 2 {
                warn!(symbols = ?diverged, "Positions diverge from exchange, re-fetching");
                return ReconcileOutcome::Diverged { symbols: diverged };
            }
            warn!(
                symbols = ?diverged,
                cycles = state.diverged_cycles,
                "Divergence persists, adopting exchange positions and blocking trading"
            );
            state.trading_blocked = true;
            ReconcileOutcome::Adopted { symbols: diverged }
        };

        self.adopt_snapshot(&mut state, snapshot);
        state.snapshot_at = Some(snapshot.fetched_at.min(now));
        state.stale_reason = None;
        self.publish(&mut state);
        outcome
    }

    fn adopt_snapshot(&self, state: &mut TrackerState, snapshot: &AccountSnapshot) {
        state.balances = snapshot.balances.clone();
        for symbol in &self.symbols {
            let mark = state.positions.get(symbol).and_then(|p| p.mark_price);
            let realized = state
                .positions
                .get(symbol)
                .map(|p| p.realized_pnl)
                .unwrap_or_default();
            let mut position = snapshot
                .position(symbol)
                .map(Position::from_exchange)
                .unwrap_or_else(|| Position::new(symbol.clone()));
            position.mark_price = mark;
            position.realized_pnl = realized;
            state.positions.insert(symbol.clone(), position);
        }
    }

    /// Keep the last snapshot in force but flag the failed refresh
    pub fn mark_stale(&self, reason: impl Into<String>) {
        let mut state = self.lock();
        let reason = reason.into();
        warn!(reason = %reason, "Account snapshot refresh failed");
        state.stale_reason = Some(reason);
        self.publish(&mut state);
    }
}
