//! Unified types shared by the exchange adapter and the trading components

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Side that reduces a position of the given signed quantity
    pub fn closing(quantity: Decimal) -> Option<Side> {
        if quantity > Decimal::ZERO {
            Some(Side::Sell)
        } else if quantity < Decimal::ZERO {
            Some(Side::Buy)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Lifecycle status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Created locally, not yet acknowledged by the exchange
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Whether the order is (or may be) resting on the exchange
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Submitted => "submitted",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// A single price level in an order book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    /// Create a new price level
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Order book depth snapshot attached to a tick
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DepthSnapshot {
    /// Bids sorted by price descending
    pub bids: Vec<PriceLevel>,
    /// Asks sorted by price ascending
    pub asks: Vec<PriceLevel>,
}

impl DepthSnapshot {
    /// Total bid size priced above `floor`
    pub fn bid_volume_above(&self, floor: Decimal) -> Decimal {
        self.bids
            .iter()
            .filter(|level| level.price > floor)
            .map(|level| level.size)
            .sum()
    }

    /// Total ask size priced below `ceiling`
    pub fn ask_volume_below(&self, ceiling: Decimal) -> Decimal {
        self.asks
            .iter()
            .filter(|level| level.price < ceiling)
            .map(|level| level.size)
            .sum()
    }
}

/// Normalized market data for one symbol at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub last_price: Decimal,
    #[serde(default)]
    pub depth: Option<DepthSnapshot>,
}

impl Tick {
    /// Calculate the midpoint price
    pub fn midpoint(&self) -> Decimal {
        (self.best_bid + self.best_ask) / Decimal::from(2)
    }

    /// Calculate the spread
    pub fn spread(&self) -> Decimal {
        self.best_ask - self.best_bid
    }

    /// Price a market order on `side` would expect to pay/receive
    pub fn execution_price(&self, side: Side) -> Decimal {
        match side {
            Side::Buy if self.best_ask > Decimal::ZERO => self.best_ask,
            Side::Sell if self.best_bid > Decimal::ZERO => self.best_bid,
            _ => self.last_price,
        }
    }
}

/// Connection status for a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Successfully connected
    Connected,
    /// Disconnected (with optional reason)
    Disconnected(Option<String>),
    /// Attempting to reconnect
    Reconnecting { attempt: u32 },
    /// Connection error
    Error(String),
}

/// Event produced by the market data layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketEvent {
    /// Normalized tick
    Tick(Tick),
    /// No data will arrive for this symbol until the stream recovers
    Gap { symbol: String, reason: String },
    /// Connection status change
    ConnectionStatus { status: ConnectionStatus },
    /// Heartbeat/ping exchange
    Heartbeat,
    /// Raw/unknown message (for debugging)
    Raw { message: String },
}

impl MarketEvent {
    /// Symbol this event concerns, if any
    pub fn symbol(&self) -> Option<&str> {
        match self {
            MarketEvent::Tick(tick) => Some(&tick.symbol),
            MarketEvent::Gap { symbol, .. } => Some(symbol),
            _ => None,
        }
    }
}

/// Balance of one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    /// Available for new orders
    pub free: Decimal,
    /// Held by open orders / margin
    pub locked: Decimal,
}

impl Balance {
    pub fn new(asset: impl Into<String>, free: Decimal, locked: Decimal) -> Self {
        Self {
            asset: asset.into(),
            free,
            locked,
        }
    }

    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Order request sent to the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client-assigned idempotency key
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// Exchange acknowledgement of an accepted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub exchange_order_id: String,
    pub client_order_id: String,
}

/// Order state as reported by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub exchange_order_id: String,
    /// Empty when the order was placed without a client id (e.g. from the web UI)
    pub client_order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    /// Cumulative executed quantity
    pub executed_quantity: Decimal,
    /// Average execution price over the executed quantity
    pub average_price: Decimal,
    /// Cumulative commission paid (positive number)
    pub commission: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Position as reported by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    /// Signed net quantity, positive = long
    pub quantity: Decimal,
    pub entry_price: Decimal,
}

/// Reconciliation baseline fetched from the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balances: HashMap<String, Balance>,
    pub open_orders: Vec<ExchangeOrder>,
    pub positions: Vec<ExchangePosition>,
    pub fetched_at: DateTime<Utc>,
}

impl AccountSnapshot {
    pub fn balance(&self, asset: &str) -> Option<&Balance> {
        self.balances.get(asset)
    }

    pub fn position(&self, symbol: &str) -> Option<&ExchangePosition> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }
}
