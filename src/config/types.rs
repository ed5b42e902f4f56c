//! Configuration types

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::common::errors::{ClientError, Result};
use crate::common::retry::RetryPolicy;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Exchange connectivity
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Symbols to trade
    #[serde(default)]
    pub symbols: Vec<SymbolConfig>,
    /// Risk limits
    #[serde(default)]
    pub risk: RiskConfig,
    /// Strategy selection and parameters
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

impl AppConfig {
    /// Reject configurations that would make the engine unsafe to run
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(ClientError::Configuration(
                "at least one symbol must be configured".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for symbol in &self.symbols {
            if !seen.insert(symbol.symbol.as_str()) {
                return Err(ClientError::Configuration(format!(
                    "symbol {} configured twice",
                    symbol.symbol
                )));
            }
            if symbol.order_quantity <= Decimal::ZERO || symbol.max_position_qty <= Decimal::ZERO {
                return Err(ClientError::Configuration(format!(
                    "{}: order_quantity and max_position_qty must be positive",
                    symbol.symbol
                )));
            }
            if symbol.quote_asset != self.exchange.quote_asset {
                return Err(ClientError::Configuration(format!(
                    "{}: quote asset {} differs from account quote asset {}",
                    symbol.symbol, symbol.quote_asset, self.exchange.quote_asset
                )));
            }
        }

        if self.settings.reconciliation_interval_seconds >= self.risk.snapshot_staleness_seconds {
            return Err(ClientError::Configuration(
                "reconciliation_interval_seconds must be shorter than snapshot_staleness_seconds"
                    .to_string(),
            ));
        }

        if self.risk.stop_loss_pct <= Decimal::ZERO || self.risk.take_profit_pct <= Decimal::ZERO {
            return Err(ClientError::Configuration(
                "stop_loss_pct and take_profit_pct must be positive".to_string(),
            ));
        }

        if self.exchange.requests_per_second == 0 {
            return Err(ClientError::Configuration(
                "requests_per_second must be greater than zero".to_string(),
            ));
        }

        check_url("exchange.rest_url", &self.exchange.rest_url, &["http", "https"])?;
        check_url("exchange.websocket_url", &self.exchange.websocket_url, &["ws", "wss"])?;

        Ok(())
    }

    /// Configured symbol names
    pub fn symbol_names(&self) -> Vec<String> {
        self.symbols.iter().map(|s| s.symbol.clone()).collect()
    }

    pub fn symbol(&self, symbol: &str) -> Option<&SymbolConfig> {
        self.symbols.iter().find(|s| s.symbol == symbol)
    }
}

fn check_url(field: &str, value: &str, schemes: &[&str]) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ClientError::Configuration(format!("{}: invalid URL '{}': {}", field, value, e)))?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(ClientError::Configuration(format!(
            "{}: scheme must be one of {:?}, got {}",
            field,
            schemes,
            parsed.scheme()
        )));
    }
    Ok(())
}

/// BingX connectivity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Base URL for the REST API
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// WebSocket URL for market data
    #[serde(default = "default_ws_url")]
    pub websocket_url: String,
    /// Key-value file holding API_KEY and API_SECRET
    #[serde(default = "default_credentials_file")]
    pub credentials_file: String,
    /// Asset the account is margined in
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Sustained request quota
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Burst allowance on top of the sustained quota
    #[serde(default = "default_request_burst")]
    pub request_burst: u32,
    /// How long a caller waits for rate-limit capacity (0 = wait indefinitely)
    #[serde(default = "default_rate_limit_wait")]
    pub rate_limit_wait_ms: u64,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Signature validity window the exchange enforces
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Symbols per streaming connection
    #[serde(default = "default_symbols_per_connection")]
    pub symbols_per_connection: usize,
    /// Also subscribe to depth snapshots
    #[serde(default)]
    pub include_depth: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            websocket_url: default_ws_url(),
            credentials_file: default_credentials_file(),
            quote_asset: default_quote_asset(),
            requests_per_second: default_requests_per_second(),
            request_burst: default_request_burst(),
            rate_limit_wait_ms: default_rate_limit_wait(),
            request_timeout_seconds: default_request_timeout(),
            recv_window_ms: default_recv_window(),
            retry: RetryPolicy::default(),
            symbols_per_connection: default_symbols_per_connection(),
            include_depth: false,
        }
    }
}

fn default_rest_url() -> String {
    "https://open-api.bingx.com".to_string()
}

fn default_ws_url() -> String {
    "wss://open-api-swap.bingx.com/swap-market".to_string()
}

fn default_credentials_file() -> String {
    ".env".to_string()
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_request_burst() -> u32 {
    5
}

fn default_rate_limit_wait() -> u64 {
    5_000
}

fn default_request_timeout() -> u64 {
    10
}

fn default_recv_window() -> u64 {
    5_000
}

fn default_symbols_per_connection() -> usize {
    4
}

/// Per-symbol trading parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolConfig {
    /// Exchange symbol, e.g. "BTC-USDT"
    pub symbol: String,
    /// Base currency, e.g. "BTC"
    pub base_asset: String,
    /// Quote currency, e.g. "USDT"
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Quantity the strategy asks for on each entry
    pub order_quantity: Decimal,
    /// Maximum absolute net position
    pub max_position_qty: Decimal,
    /// Decimal places accepted for quantities
    #[serde(default = "default_qty_precision")]
    pub qty_precision: u32,
    /// Decimal places accepted for prices
    #[serde(default = "default_price_precision")]
    pub price_precision: u32,
    /// Smallest order quantity the exchange accepts
    #[serde(default)]
    pub min_qty: Decimal,
    /// Smallest order notional the exchange accepts
    #[serde(default = "default_min_notional")]
    pub min_notional: Decimal,
}

impl SymbolConfig {
    pub fn new(
        symbol: &str,
        base_asset: &str,
        order_quantity: Decimal,
        max_position_qty: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            base_asset: base_asset.to_string(),
            quote_asset: default_quote_asset(),
            order_quantity,
            max_position_qty,
            qty_precision: default_qty_precision(),
            price_precision: default_price_precision(),
            min_qty: Decimal::ZERO,
            min_notional: default_min_notional(),
        }
    }
}

fn default_qty_precision() -> u32 {
    3
}

fn default_price_precision() -> u32 {
    2
}

fn default_min_notional() -> Decimal {
    dec!(5)
}

/// Risk limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Account snapshot older than this blocks new orders
    #[serde(default = "default_snapshot_staleness")]
    pub snapshot_staleness_seconds: u64,
    /// Aggregate marked exposure allowed, as a multiple of equity
    #[serde(default = "default_max_exposure_ratio")]
    pub max_exposure_ratio: Decimal,
    /// Fee reserve added to every notional, as a fraction
    #[serde(default = "default_fee_buffer")]
    pub fee_buffer_ratio: Decimal,
    /// Taker fee rate charged by the exchange
    #[serde(default = "default_taker_fee")]
    pub taker_fee_rate: Decimal,
    /// Maker fee rate charged by the exchange
    #[serde(default = "default_maker_fee")]
    pub maker_fee_rate: Decimal,
    /// Unrealized loss (percent of entry) that forces liquidation
    #[serde(default = "default_stop_loss")]
    pub stop_loss_pct: Decimal,
    /// Unrealized gain (percent of entry) that forces liquidation
    #[serde(default = "default_take_profit")]
    pub take_profit_pct: Decimal,
    /// Tolerance when comparing local and exchange positions
    #[serde(default = "default_position_tolerance")]
    pub position_tolerance: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            snapshot_staleness_seconds: default_snapshot_staleness(),
            max_exposure_ratio: default_max_exposure_ratio(),
            fee_buffer_ratio: default_fee_buffer(),
            taker_fee_rate: default_taker_fee(),
            maker_fee_rate: default_maker_fee(),
            stop_loss_pct: default_stop_loss(),
            take_profit_pct: default_take_profit(),
            position_tolerance: default_position_tolerance(),
        }
    }
}

fn default_snapshot_staleness() -> u64 {
    120
}

fn default_max_exposure_ratio() -> Decimal {
    dec!(1)
}

fn default_fee_buffer() -> Decimal {
    dec!(0.001)
}

fn default_taker_fee() -> Decimal {
    dec!(0.0005)
}

fn default_maker_fee() -> Decimal {
    dec!(0.0002)
}

fn default_stop_loss() -> Decimal {
    dec!(5)
}

fn default_take_profit() -> Decimal {
    dec!(10)
}

fn default_position_tolerance() -> Decimal {
    dec!(0.00000001)
}

/// Strategy selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Strategy variant, currently "macd"
    #[serde(default = "default_strategy_kind")]
    pub kind: String,
    #[serde(default = "default_fast_period")]
    pub fast_period: usize,
    #[serde(default = "default_slow_period")]
    pub slow_period: usize,
    #[serde(default = "default_signal_period")]
    pub signal_period: usize,
    /// Minimum histogram change (percent) to call momentum
    #[serde(default = "default_momentum_threshold")]
    pub momentum_threshold_pct: f64,
    /// Bid/ask volume ratio required as depth confirmation
    #[serde(default = "default_depth_pressure")]
    pub depth_pressure_ratio: f64,
    /// Closed 1m klines fetched per symbol to warm indicators up
    #[serde(default = "default_warmup_klines")]
    pub warmup_klines: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            kind: default_strategy_kind(),
            fast_period: default_fast_period(),
            slow_period: default_slow_period(),
            signal_period: default_signal_period(),
            momentum_threshold_pct: default_momentum_threshold(),
            depth_pressure_ratio: default_depth_pressure(),
            warmup_klines: default_warmup_klines(),
        }
    }
}

fn default_strategy_kind() -> String {
    "macd".to_string()
}

fn default_fast_period() -> usize {
    12
}

fn default_slow_period() -> usize {
    26
}

fn default_signal_period() -> usize {
    9
}

fn default_momentum_threshold() -> f64 {
    3.0
}

fn default_depth_pressure() -> f64 {
    1.2
}

fn default_warmup_klines() -> u32 {
    60
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Delay between reconnection attempts in milliseconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Upper bound for the reconnection delay in milliseconds
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,
    /// Maximum reconnection attempts (0 = infinite)
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    /// Heartbeat/ping interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
    /// Market data older than this means "market unknown"
    #[serde(default = "default_market_staleness")]
    pub market_staleness_seconds: u64,
    /// Period of the reconciliation task
    #[serde(default = "default_reconciliation_interval")]
    pub reconciliation_interval_seconds: u64,
    /// Period of the open order status sync
    #[serde(default = "default_order_sync_interval")]
    pub order_sync_interval_seconds: u64,
    /// Submitted orders with no terminal update after this are checked for expiry
    #[serde(default = "default_order_timeout")]
    pub order_timeout_seconds: u64,
    /// Period of time-driven strategy evaluation
    #[serde(default = "default_strategy_timer")]
    pub strategy_timer_seconds: u64,
    /// Resubmissions allowed when the exchange never saw an order
    #[serde(default = "default_max_resubmits")]
    pub max_resubmits: u32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
            max_reconnect_attempts: 0,
            heartbeat_interval_seconds: default_heartbeat_interval(),
            market_staleness_seconds: default_market_staleness(),
            reconciliation_interval_seconds: default_reconciliation_interval(),
            order_sync_interval_seconds: default_order_sync_interval(),
            order_timeout_seconds: default_order_timeout(),
            strategy_timer_seconds: default_strategy_timer(),
            max_resubmits: default_max_resubmits(),
        }
    }
}

impl AppSettings {
    /// Reconnection policy for the market data feed
    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_reconnect_attempts,
            initial_backoff_ms: self.reconnect_delay_ms,
            max_backoff_ms: self.max_reconnect_delay_ms,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_reconnect_delay() -> u64 {
    1000
}

fn default_max_reconnect_delay() -> u64 {
    30_000
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_market_staleness() -> u64 {
    15
}

fn default_reconciliation_interval() -> u64 {
    30
}

fn default_order_sync_interval() -> u64 {
    5
}

fn default_order_timeout() -> u64 {
    60
}

fn default_strategy_timer() -> u64 {
    60
}

fn default_max_resubmits() -> u32 {
    2
}
