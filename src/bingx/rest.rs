//! REST API client for BingX perpetual swap

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::auth::{canonical_query, HmacSigner, RequestSigner, API_KEY_HEADER};
use super::messages::*;
use crate::common::errors::{ClientError, Result};
use crate::common::rate_limit::RequestLimiter;
use crate::common::retry::RetryPolicy;
use crate::common::traits::ExchangeApi;
use crate::common::types::{
    AccountSnapshot, Balance, DepthSnapshot, ExchangeOrder, OrderAck, OrderRequest, OrderType,
};
use crate::config::credentials::Credentials;
use crate::config::types::ExchangeConfig;

const ORDER_PATH: &str = "/openApi/swap/v2/trade/order";
const OPEN_ORDERS_PATH: &str = "/openApi/swap/v2/trade/openOrders";
const BALANCE_PATH: &str = "/openApi/swap/v2/user/balance";
const POSITIONS_PATH: &str = "/openApi/swap/v2/user/positions";
const PRICE_PATH: &str = "/openApi/swap/v1/ticker/price";
const DEPTH_PATH: &str = "/openApi/swap/v2/quote/depth";
const TICKER_PATH: &str = "/openApi/swap/v2/quote/ticker";
const KLINES_PATH: &str = "/openApi/swap/v3/quote/klines";
const SERVER_TIME_PATH: &str = "/openApi/swap/v2/server/time";

/// Signed REST client for BingX
///
/// Every request passes the shared rate limiter; transient failures are retried
/// according to the configured [`RetryPolicy`].
#[derive(Clone)]
pub struct BingxRestClient {
    /// HTTP client
    client: Client,
    /// Base URL, without trailing slash
    base_url: String,
    signer: Arc<dyn RequestSigner>,
    limiter: RequestLimiter,
    retry: RetryPolicy,
    recv_window_ms: u64,
}

impl BingxRestClient {
    /// Create a client that owns `credentials` for its whole lifetime
    pub fn new(config: &ExchangeConfig, credentials: Credentials) -> Result<Self> {
        Self::with_signer(config, Arc::new(HmacSigner::bingx(credentials)))
    }

    /// Create a client with a custom signing scheme
    pub fn with_signer(config: &ExchangeConfig, signer: Arc<dyn RequestSigner>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| ClientError::Internal(e.to_string()))?;

        let max_wait = match config.rate_limit_wait_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let limiter =
            RequestLimiter::new(config.requests_per_second, config.request_burst, max_wait)?;

        Ok(Self {
            client,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            signer,
            limiter,
            retry: config.retry.clone(),
            recv_window_ms: config.recv_window_ms,
        })
    }

    /// Build the query string, appending `timestamp`, `recvWindow` and `signature`
    fn signed_query(&self, params: &BTreeMap<String, String>) -> Result<String> {
        let mut params = params.clone();
        params.insert(
            "timestamp".to_string(),
            Utc::now().timestamp_millis().to_string(),
        );
        params.insert("recvWindow".to_string(), self.recv_window_ms.to_string());

        let payload = canonical_query(&params);
        let signature = self.signer.sign(&payload)?;
        Ok(format!("{}&signature={}", payload, signature))
    }

    /// Send one request and decode the `{code, msg, data}` envelope
    async fn send_once<T: DeserializeOwned>(
        &self,
        method: &Method,
        path: &str,
        params: &BTreeMap<String, String>,
        signed: bool,
    ) -> Result<T> {
        let query = if signed {
            self.signed_query(params)?
        } else {
            canonical_query(params)
        };
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let mut builder = self.client.request(method.clone(), &url);
        if signed {
            builder = builder.header(API_KEY_HEADER, self.signer.api_key());
        }

        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Authentication(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_seconds = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok());
            return Err(ClientError::RateLimit {
                message: format!("HTTP 429 on {}", path),
                retry_after_seconds,
            });
        }

        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Network {
                message: format!("HTTP {}: {}", status, body),
                attempts: 1,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::InvalidResponse(format!(
                "Server returned status {}: {}",
                status, body
            )));
        }

        let body = response.text().await?;
        let envelope: ApiResponse<T> = serde_json::from_str(&body)?;
        envelope.into_data()
    }

    /// Rate-limited request with retry on transient failures
    ///
    /// A local rate-limiter timeout is returned immediately. Transient failures
    /// that outlast the retry budget come back as `Network`.
    ///
    /// POST creates orders, so a POST attempt that may have reached the
    /// exchange is never repeated here. Its error is returned as is and the
    /// caller looks the order up by client order id.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: BTreeMap<String, String>,
        signed: bool,
    ) -> Result<T> {
        let mut backoff = self.retry.backoff();

        loop {
            self.limiter.acquire().await?;

            let err = match self.send_once::<T>(&method, path, &params, signed).await {
                Ok(data) => return Ok(data),
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err),
            };

            if method == Method::POST && err.is_indeterminate() {
                warn!(%method, path, error = %err, "Outcome unknown, not repeating");
                return Err(err);
            }

            let Some(mut delay) = backoff.next_backoff() else {
                let attempts = backoff.attempts().max(1);
                warn!(%method, path, attempts, error = %err, "Retries exhausted");
                return Err(match err {
                    ClientError::RateLimit { .. } => err,
                    other => ClientError::Network {
                        message: other.to_string(),
                        attempts,
                    },
                });
            };

            if let ClientError::RateLimit {
                retry_after_seconds: Some(secs),
                ..
            } = &err
            {
                delay = delay.max(Duration::from_secs(*secs));
            }

            debug!(
                %method,
                path,
                attempt = backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying request"
            );
            tokio::time::sleep(delay).await;
        }
    }

    // ========================================================================
    // Public Endpoints (No Authentication Required)
    // ========================================================================

    /// Get server time in milliseconds
    #[instrument(skip(self))]
    pub async fn get_server_time(&self) -> Result<i64> {
        let data: ServerTimeData = self
            .request(Method::GET, SERVER_TIME_PATH, BTreeMap::new(), false)
            .await?;
        Ok(data.server_time)
    }

    /// Get the latest traded price for a symbol
    #[instrument(skip(self))]
    pub async fn get_latest_price(&self, symbol: &str) -> Result<Decimal> {
        let data: PriceData = self
            .request(Method::GET, PRICE_PATH, symbol_param(symbol), false)
            .await?;
        data.price
            .parse()
            .map_err(|e| ClientError::InvalidResponse(format!("Invalid price: {}", e)))
    }

    /// Get order book depth for a symbol
    #[instrument(skip(self))]
    pub async fn get_depth(&self, symbol: &str, limit: u32) -> Result<DepthSnapshot> {
        let mut params = symbol_param(symbol);
        params.insert("limit".to_string(), limit.to_string());
        let data: DepthData = self.request(Method::GET, DEPTH_PATH, params, false).await?;
        Ok(data.into_snapshot())
    }

    /// Get 24h ticker statistics for a symbol
    #[instrument(skip(self))]
    pub async fn get_ticker(&self, symbol: &str) -> Result<TickerData> {
        let data: TickerResponseData = self
            .request(Method::GET, TICKER_PATH, symbol_param(symbol), false)
            .await?;
        match data {
            TickerResponseData::Single(ticker) => Ok(ticker),
            TickerResponseData::Multiple(tickers) => tickers
                .into_iter()
                .find(|t| t.symbol == symbol)
                .ok_or_else(|| ClientError::NotFound(format!("ticker for {}", symbol))),
        }
    }

    /// Get candlesticks for a symbol, oldest first
    #[instrument(skip(self))]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
    ) -> Result<Vec<Kline>> {
        let mut params = symbol_param(symbol);
        params.insert("interval".to_string(), interval.as_str().to_string());
        params.insert("limit".to_string(), limit.to_string());

        let data: Vec<KlineData> = self.request(Method::GET, KLINES_PATH, params, false).await?;
        let mut klines = data
            .into_iter()
            .map(KlineData::into_kline)
            .collect::<Result<Vec<_>>>()?;
        klines.sort_by_key(|k| k.open_time);
        Ok(klines)
    }

    // ========================================================================
    // Private Endpoints (Authentication Required)
    // ========================================================================

    /// Get the futures account balance
    #[instrument(skip(self))]
    pub async fn get_balance(&self) -> Result<Balance> {
        let data: BalanceData = self
            .request(Method::GET, BALANCE_PATH, BTreeMap::new(), true)
            .await?;
        data.balance.into_balance()
    }

    /// Get all open orders
    #[instrument(skip(self))]
    pub async fn get_open_orders(&self) -> Result<Vec<ExchangeOrder>> {
        let data: OpenOrdersData = self
            .request(Method::GET, OPEN_ORDERS_PATH, BTreeMap::new(), true)
            .await?;
        data.orders
            .into_iter()
            .map(RawOrder::into_exchange_order)
            .collect()
    }

    /// Get all open positions
    #[instrument(skip(self))]
    pub async fn get_positions(&self) -> Result<Vec<crate::common::types::ExchangePosition>> {
        let data: Vec<RawPosition> = self
            .request(Method::GET, POSITIONS_PATH, BTreeMap::new(), true)
            .await?;
        data.into_iter().map(RawPosition::into_position).collect()
    }
}

impl std::fmt::Debug for BingxRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BingxRestClient")
            .field("base_url", &self.base_url)
            .field("limiter", &self.limiter)
            .field("retry", &self.retry)
            .finish()
    }
}

fn symbol_param(symbol: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("symbol".to_string(), symbol.to_string());
    params
}

fn order_params(request: &OrderRequest) -> BTreeMap<String, String> {
    let mut params = symbol_param(&request.symbol);
    params.insert("side".to_string(), request.side.to_string());
    params.insert("positionSide".to_string(), "BOTH".to_string());
    params.insert("type".to_string(), request.order_type.to_string());
    params.insert(
        "quantity".to_string(),
        request.quantity.normalize().to_string(),
    );
    if let (OrderType::Limit, Some(price)) = (request.order_type, request.price) {
        params.insert("price".to_string(), price.normalize().to_string());
        params.insert("timeInForce".to_string(), "GTC".to_string());
    }
    params.insert(
        "clientOrderID".to_string(),
        request.client_order_id.clone(),
    );
    params
}

fn key_params(symbol: &str, client_order_id: &str) -> BTreeMap<String, String> {
    let mut params = symbol_param(symbol);
    params.insert("clientOrderID".to_string(), client_order_id.to_string());
    params
}

#[async_trait]
impl ExchangeApi for BingxRestClient {
    #[instrument(skip(self, request), fields(symbol = %request.symbol, key = %request.client_order_id))]
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        if request.order_type == OrderType::Limit && request.price.is_none() {
            return Err(ClientError::Internal(
                "limit order without a price".to_string(),
            ));
        }

        let data: PlaceOrderData = self
            .request(Method::POST, ORDER_PATH, order_params(request), true)
            .await?;

        debug!(exchange_order_id = %data.order.order_id, "Order accepted");
        Ok(OrderAck {
            exchange_order_id: data.order.order_id,
            client_order_id: request.client_order_id.clone(),
        })
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, symbol: &str, client_order_id: &str) -> Result<()> {
        let _: OrderData = self
            .request(
                Method::DELETE,
                ORDER_PATH,
                key_params(symbol, client_order_id),
                true,
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_order(&self, symbol: &str, client_order_id: &str) -> Result<ExchangeOrder> {
        let data: OrderData = self
            .request(
                Method::GET,
                ORDER_PATH,
                key_params(symbol, client_order_id),
                true,
            )
            .await?;

        let mut order = data.order.into_exchange_order()?;
        if order.client_order_id.is_empty() {
            order.client_order_id = client_order_id.to_string();
        }
        Ok(order)
    }

    #[instrument(skip(self, symbols), fields(symbols = symbols.len()))]
    async fn fetch_account_snapshot(&self, symbols: &[String]) -> Result<AccountSnapshot> {
        let (balance, positions, open_orders) = tokio::try_join!(
            self.get_balance(),
            self.get_positions(),
            self.get_open_orders()
        )?;

        let wanted: HashSet<&str> = symbols.iter().map(String::as_str).collect();

        let mut balances = HashMap::new();
        balances.insert(balance.asset.clone(), balance);

        let positions = positions
            .into_iter()
            .filter(|p| wanted.contains(p.symbol.as_str()) && !p.quantity.is_zero())
            .collect();
        let open_orders = open_orders
            .into_iter()
            .filter(|o| wanted.contains(o.symbol.as_str()))
            .collect();

        Ok(AccountSnapshot {
            balances,
            open_orders,
            positions,
            fetched_at: Utc::now(),
        })
    }

    fn venue(&self) -> &'static str {
        "bingx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Side;
    use rust_decimal_macros::dec;

    fn client() -> BingxRestClient {
        let config = ExchangeConfig::default();
        BingxRestClient::new(&config, Credentials::new("key", "secret").unwrap()).unwrap()
    }

    #[test]
    fn test_signed_query_appends_signature_last() {
        let client = client();
        let query = client.signed_query(&symbol_param("BTC-USDT")).unwrap();

        let (payload, signature) = query.rsplit_once("&signature=").unwrap();
        assert!(payload.starts_with("recvWindow=5000&symbol=BTC-USDT&timestamp="));
        assert_eq!(signature.len(), 64);
        assert_eq!(signature, client.signer.sign(payload).unwrap());
    }

    #[test]
    fn test_order_params_for_limit_order() {
        let request = OrderRequest {
            client_order_id: "bt0001".to_string(),
            symbol: "ETH-USDT".to_string(),
            side: Side::Sell,
            order_type: OrderType::Limit,
            quantity: dec!(0.500),
            price: Some(dec!(3120.50)),
        };
        let params = order_params(&request);
        assert_eq!(params["side"], "SELL");
        assert_eq!(params["type"], "LIMIT");
        assert_eq!(params["quantity"], "0.5");
        assert_eq!(params["price"], "3120.5");
        assert_eq!(params["clientOrderID"], "bt0001");
    }

    #[test]
    fn test_market_order_has_no_price() {
        let request = OrderRequest {
            client_order_id: "bt0002".to_string(),
            symbol: "BTC-USDT".to_string(),
            side: Side::Buy,
            order_type: OrderType::Market,
            quantity: dec!(0.01),
            price: Some(dec!(50000)),
        };
        assert!(!order_params(&request).contains_key("price"));
    }
}
