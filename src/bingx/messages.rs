//! BingX-specific message types and their conversion into unified types

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::common::errors::{ClientError, Result};
use crate::common::types::{
    Balance, DepthSnapshot, ExchangeOrder, ExchangePosition, OrderStatus, OrderType, PriceLevel,
    Side,
};

// ============================================================================
// Error codes
// ============================================================================

/// Signature verification failed
pub const CODE_SIGNATURE_FAILED: i64 = 100001;
/// Unknown or incorrect API key
pub const CODE_BAD_API_KEY: i64 = 100413;
/// Request IP not whitelisted for this key
pub const CODE_IP_NOT_ALLOWED: i64 = 100419;
/// Request frequency limit hit
pub const CODE_RATE_LIMITED: i64 = 100410;
/// Internal server error
pub const CODE_INTERNAL: i64 = 100500;
/// Server busy
pub const CODE_BUSY: i64 = 100503;
/// Service temporarily unavailable
pub const CODE_UNAVAILABLE: i64 = 80012;
/// Order does not exist
pub const CODE_ORDER_NOT_EXIST: i64 = 80016;
/// Order already filled or cancelled
pub const CODE_ORDER_COMPLETED: i64 = 80018;
/// Order does not exist (alternate code used by the cancel endpoint)
pub const CODE_ORDER_NOT_FOUND: i64 = 109421;

/// Map a non-zero API `code` onto the error taxonomy
pub fn classify_api_error(code: i64, msg: &str) -> ClientError {
    match code {
        CODE_SIGNATURE_FAILED | CODE_BAD_API_KEY | CODE_IP_NOT_ALLOWED => {
            ClientError::Authentication(format!("code {}: {}", code, msg))
        }
        CODE_RATE_LIMITED => ClientError::RateLimit {
            message: msg.to_string(),
            retry_after_seconds: None,
        },
        CODE_INTERNAL | CODE_BUSY | CODE_UNAVAILABLE => ClientError::Network {
            message: format!("code {}: {}", code, msg),
            attempts: 1,
        },
        CODE_ORDER_NOT_EXIST | CODE_ORDER_NOT_FOUND => {
            ClientError::NotFound(format!("code {}: {}", code, msg))
        }
        CODE_ORDER_COMPLETED => ClientError::AlreadyTerminal(format!("code {}: {}", code, msg)),
        _ => ClientError::Rejected {
            code,
            reason: msg.to_string(),
        },
    }
}

// ============================================================================
// REST envelopes
// ============================================================================

/// Common `{code, msg, data}` envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Unwrap the payload or classify the API error
    pub fn into_data(self) -> Result<T> {
        if self.code != 0 {
            return Err(classify_api_error(self.code, &self.msg));
        }
        self.data
            .ok_or_else(|| ClientError::InvalidResponse(format!("missing data: {}", self.msg)))
    }
}

/// Order ids arrive as large JSON numbers or as strings depending on endpoint
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    if value.is_empty() {
        return Ok(Decimal::ZERO);
    }
    value
        .parse()
        .map_err(|e| ClientError::InvalidResponse(format!("Invalid {} '{}': {}", field, value, e)))
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

// ============================================================================
// Trading endpoints
// ============================================================================

/// `POST /openApi/swap/v2/trade/order` payload
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderData {
    pub order: PlacedOrder,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlacedOrder {
    #[serde(rename = "orderId", deserialize_with = "string_or_number")]
    pub order_id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(rename = "clientOrderID", alias = "clientOrderId", default)]
    pub client_order_id: String,
}

/// Single order payload (query and cancel endpoints)
#[derive(Debug, Clone, Deserialize)]
pub struct OrderData {
    pub order: RawOrder,
}

/// `GET /openApi/swap/v2/trade/openOrders` payload
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrdersData {
    #[serde(default)]
    pub orders: Vec<RawOrder>,
}

/// Order as the exchange reports it
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrder {
    pub symbol: String,
    #[serde(deserialize_with = "string_or_number")]
    pub order_id: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(default)]
    pub orig_qty: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub executed_qty: String,
    #[serde(default)]
    pub avg_price: String,
    #[serde(default)]
    pub commission: String,
    pub status: String,
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub update_time: i64,
    #[serde(default, alias = "clientOrderID")]
    pub client_order_id: String,
}

/// Map a BingX order status string onto the local lifecycle
pub fn parse_status(status: &str) -> Result<OrderStatus> {
    match status.to_uppercase().as_str() {
        "NEW" | "PENDING" => Ok(OrderStatus::Submitted),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELED" | "CANCELLED" => Ok(OrderStatus::Cancelled),
        "FAILED" | "REJECTED" => Ok(OrderStatus::Rejected),
        "EXPIRED" => Ok(OrderStatus::Expired),
        other => Err(ClientError::InvalidResponse(format!(
            "Unknown order status: {}",
            other
        ))),
    }
}

pub fn parse_side(side: &str) -> Result<Side> {
    match side.to_uppercase().as_str() {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(ClientError::InvalidResponse(format!("Unknown side: {}", other))),
    }
}

pub fn parse_order_type(order_type: &str) -> OrderType {
    match order_type.to_uppercase().as_str() {
        "LIMIT" => OrderType::Limit,
        _ => OrderType::Market,
    }
}

impl RawOrder {
    pub fn into_exchange_order(self) -> Result<ExchangeOrder> {
        let order_type = parse_order_type(&self.order_type);
        let price = parse_decimal("price", &self.price)?;
        let updated = if self.update_time > 0 {
            self.update_time
        } else {
            self.time
        };

        Ok(ExchangeOrder {
            exchange_order_id: self.order_id,
            client_order_id: self.client_order_id,
            side: parse_side(&self.side)?,
            order_type,
            quantity: parse_decimal("origQty", &self.orig_qty)?,
            price: match order_type {
                OrderType::Limit if price > Decimal::ZERO => Some(price),
                _ => None,
            },
            status: parse_status(&self.status)?,
            executed_quantity: parse_decimal("executedQty", &self.executed_qty)?,
            average_price: parse_decimal("avgPrice", &self.avg_price)?,
            // reported as a negative number (paid)
            commission: parse_decimal("commission", &self.commission)?.abs(),
            updated_at: millis_to_datetime(updated),
            symbol: self.symbol,
        })
    }
}

/// `GET /openApi/swap/v2/user/balance` payload
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceData {
    pub balance: RawBalance,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBalance {
    pub asset: String,
    #[serde(default)]
    pub balance: String,
    #[serde(default)]
    pub equity: String,
    #[serde(default)]
    pub available_margin: String,
    #[serde(default)]
    pub used_margin: String,
    #[serde(default)]
    pub freezed_margin: String,
}

impl RawBalance {
    pub fn into_balance(self) -> Result<Balance> {
        let free = parse_decimal("availableMargin", &self.available_margin)?;
        let locked = parse_decimal("usedMargin", &self.used_margin)?
            + parse_decimal("freezedMargin", &self.freezed_margin)?;
        Ok(Balance::new(self.asset, free, locked))
    }
}

/// Entry of `GET /openApi/swap/v2/user/positions`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPosition {
    pub symbol: String,
    #[serde(default)]
    pub position_side: String,
    #[serde(default)]
    pub position_amt: String,
    #[serde(default)]
    pub avg_price: String,
}

impl RawPosition {
    /// Hedge-mode LONG/SHORT amounts are unsigned; one-way BOTH amounts are signed
    pub fn into_position(self) -> Result<ExchangePosition> {
        let amount = parse_decimal("positionAmt", &self.position_amt)?;
        let quantity = match self.position_side.to_uppercase().as_str() {
            "LONG" => amount.abs(),
            "SHORT" => -amount.abs(),
            _ => amount,
        };
        Ok(ExchangePosition {
            symbol: self.symbol,
            quantity,
            entry_price: parse_decimal("avgPrice", &self.avg_price)?,
        })
    }
}

// ============================================================================
// Market endpoints
// ============================================================================

/// `GET /openApi/swap/v1/ticker/price` payload
#[derive(Debug, Clone, Deserialize)]
pub struct PriceData {
    pub symbol: String,
    pub price: String,
    #[serde(default)]
    pub time: i64,
}

/// `GET /openApi/swap/v2/quote/depth` payload
#[derive(Debug, Clone, Deserialize)]
pub struct DepthData {
    #[serde(rename = "T", default)]
    pub timestamp: i64,
    #[serde(default)]
    pub asks: Vec<[String; 2]>,
    #[serde(default)]
    pub bids: Vec<[String; 2]>,
}

pub fn parse_levels(levels: &[[String; 2]]) -> Vec<PriceLevel> {
    levels
        .iter()
        .filter_map(|[price, size]| {
            Some(PriceLevel {
                price: price.parse().ok()?,
                size: size.parse().ok()?,
            })
        })
        .collect()
}

impl DepthData {
    /// Bids descending, asks ascending, regardless of wire order
    pub fn into_snapshot(self) -> DepthSnapshot {
        let mut bids = parse_levels(&self.bids);
        let mut asks = parse_levels(&self.asks);
        bids.sort_by(|a, b| b.price.cmp(&a.price));
        asks.sort_by(|a, b| a.price.cmp(&b.price));
        DepthSnapshot { bids, asks }
    }
}

/// `GET /openApi/swap/v2/quote/ticker` payload (24h statistics)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerData {
    pub symbol: String,
    #[serde(default)]
    pub price_change_percent: String,
    #[serde(default)]
    pub last_price: String,
    #[serde(default)]
    pub high_price: String,
    #[serde(default)]
    pub low_price: String,
    #[serde(default)]
    pub volume: String,
    #[serde(default)]
    pub bid_price: String,
    #[serde(default)]
    pub ask_price: String,
}

/// The ticker endpoint returns an object for one symbol, a list otherwise
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TickerResponseData {
    Single(TickerData),
    Multiple(Vec<TickerData>),
}

/// `GET /openApi/swap/v3/quote/klines` entry
#[derive(Debug, Clone, Deserialize)]
pub struct KlineData {
    pub open: String,
    pub close: String,
    pub high: String,
    pub low: String,
    pub volume: String,
    pub time: i64,
}

/// Parsed candlestick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl KlineData {
    pub fn into_kline(self) -> Result<Kline> {
        Ok(Kline {
            open_time: millis_to_datetime(self.time),
            open: parse_decimal("open", &self.open)?,
            high: parse_decimal("high", &self.high)?,
            low: parse_decimal("low", &self.low)?,
            close: parse_decimal("close", &self.close)?,
            volume: parse_decimal("volume", &self.volume)?,
        })
    }
}

/// Kline interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
        }
    }
}

/// `GET /openApi/swap/v2/server/time` payload
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTimeData {
    pub server_time: i64,
}

// ============================================================================
// WebSocket messages
// ============================================================================

/// Subscription request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsSubscribeMessage {
    pub id: String,
    #[serde(rename = "reqType")]
    pub req_type: String,
    #[serde(rename = "dataType")]
    pub data_type: String,
}

impl WsSubscribeMessage {
    pub fn subscribe(data_type: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            req_type: "sub".to_string(),
            data_type: data_type.into(),
        }
    }
}

/// Envelope of every pushed message
#[derive(Debug, Clone, Deserialize)]
pub struct WsEnvelope {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(rename = "dataType", default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub msg: Option<String>,
}

/// `<symbol>@bookTicker` payload
#[derive(Debug, Clone, Deserialize)]
pub struct WsBookTicker {
    #[serde(rename = "E", default)]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b")]
    pub bid_price: String,
    #[serde(rename = "B", default)]
    pub bid_qty: String,
    #[serde(rename = "a")]
    pub ask_price: String,
    #[serde(rename = "A", default)]
    pub ask_qty: String,
}

/// `<symbol>@lastPrice` payload
#[derive(Debug, Clone, Deserialize)]
pub struct WsLastPrice {
    #[serde(rename = "E", default)]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub price: String,
}

/// `<symbol>@depth20@500ms` payload
#[derive(Debug, Clone, Deserialize)]
pub struct WsDepth {
    #[serde(default)]
    pub bids: Vec<[String; 2]>,
    #[serde(default)]
    pub asks: Vec<[String; 2]>,
}

pub(crate) fn event_time(ms: i64) -> DateTime<Utc> {
    if ms > 0 {
        millis_to_datetime(ms)
    } else {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_query_order() {
        let json = r#"{
            "code": 0,
            "msg": "",
            "data": {
                "order": {
                    "symbol": "BTC-USDT",
                    "orderId": 1736012449498123456,
                    "side": "BUY",
                    "positionSide": "BOTH",
                    "type": "MARKET",
                    "origQty": "0.0100",
                    "price": "0.0",
                    "executedQty": "0.0040",
                    "avgPrice": "50010.5",
                    "cumQuote": "200.04",
                    "commission": "-0.100021",
                    "status": "PARTIALLY_FILLED",
                    "time": 1736012449000,
                    "updateTime": 1736012450000,
                    "clientOrderId": "bt7d9a"
                }
            }
        }"#;

        let response: ApiResponse<OrderData> = serde_json::from_str(json).unwrap();
        let order = response.into_data().unwrap().order.into_exchange_order().unwrap();

        assert_eq!(order.exchange_order_id, "1736012449498123456");
        assert_eq!(order.client_order_id, "bt7d9a");
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(order.price, None);
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.quantity, dec!(0.0100));
        assert_eq!(order.executed_quantity, dec!(0.0040));
        assert_eq!(order.average_price, dec!(50010.5));
        assert_eq!(order.commission, dec!(0.100021));
    }

    #[test]
    fn test_error_codes_are_classified() {
        assert!(matches!(
            classify_api_error(CODE_SIGNATURE_FAILED, "Signature verification failed"),
            ClientError::Authentication(_)
        ));
        assert!(matches!(
            classify_api_error(CODE_ORDER_NOT_EXIST, "order not exist"),
            ClientError::NotFound(_)
        ));
        assert!(matches!(
            classify_api_error(CODE_BUSY, "busy"),
            ClientError::Network { .. }
        ));
        assert!(matches!(
            classify_api_error(101204, "Insufficient margin"),
            ClientError::Rejected { code: 101204, .. }
        ));
    }

    #[test]
    fn test_non_zero_code_becomes_error() {
        let json = r#"{"code": 100413, "msg": "Incorrect apiKey"}"#;
        let response: ApiResponse<OrderData> = serde_json::from_str(json).unwrap();
        assert!(matches!(
            response.into_data(),
            Err(ClientError::Authentication(_))
        ));
    }

    #[test]
    fn test_position_sign_by_side() {
        let short = RawPosition {
            symbol: "ETH-USDT".to_string(),
            position_side: "SHORT".to_string(),
            position_amt: "0.5".to_string(),
            avg_price: "3000".to_string(),
        };
        assert_eq!(short.into_position().unwrap().quantity, dec!(-0.5));

        let one_way = RawPosition {
            symbol: "ETH-USDT".to_string(),
            position_side: "BOTH".to_string(),
            position_amt: "-0.25".to_string(),
            avg_price: "3000".to_string(),
        };
        assert_eq!(one_way.into_position().unwrap().quantity, dec!(-0.25));
    }

    #[test]
    fn test_balance_conversion() {
        let json = r#"{
            "asset": "USDT",
            "balance": "1000.0",
            "equity": "1003.2",
            "availableMargin": "850.0",
            "usedMargin": "150.0",
            "freezedMargin": "0"
        }"#;
        let raw: RawBalance = serde_json::from_str(json).unwrap();
        let balance = raw.into_balance().unwrap();
        assert_eq!(balance.free, dec!(850.0));
        assert_eq!(balance.locked, dec!(150.0));
        assert_eq!(balance.total(), dec!(1000.0));
    }

    #[test]
    fn test_depth_snapshot_is_sorted() {
        let depth = DepthData {
            timestamp: 0,
            asks: vec![
                ["101.5".to_string(), "2".to_string()],
                ["101.0".to_string(), "1".to_string()],
            ],
            bids: vec![
                ["99.0".to_string(), "4".to_string()],
                ["100.0".to_string(), "3".to_string()],
            ],
        }
        .into_snapshot();
        assert_eq!(depth.asks[0].price, dec!(101.0));
        assert_eq!(depth.bids[0].price, dec!(100.0));
    }

    #[test]
    fn test_unknown_status_is_invalid_response() {
        assert!(parse_status("WAT").is_err());
        assert_eq!(parse_status("canceled").unwrap(), OrderStatus::Cancelled);
    }
}
