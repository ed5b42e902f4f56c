//! Trait definitions at the exchange boundary
//!
//! Everything exchange-specific (endpoints, signing, error codes, wire formats)
//! lives behind these two traits so another venue can be substituted without
//! touching the trading components.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::errors::Result;
use super::types::{AccountSnapshot, ExchangeOrder, MarketEvent, OrderAck, OrderRequest};

/// Signed REST access to the exchange
///
/// Implementations own the credentials, apply rate limiting and retry
/// transient failures internally. Errors that reach the caller are final:
/// `Network` after retries are exhausted, `RateLimit` when the caller's wait
/// budget elapsed, `Authentication` which is fatal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Place an order. The request's `client_order_id` is forwarded so the
    /// exchange can deduplicate and so the order can be looked up later.
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck>;

    /// Cancel an order by its idempotency key
    ///
    /// Fails with `NotFound` if the exchange has no such order and with
    /// `AlreadyTerminal` if it is already filled/cancelled.
    async fn cancel_order(&self, symbol: &str, client_order_id: &str) -> Result<()>;

    /// Look up an order by its idempotency key
    async fn query_order(&self, symbol: &str, client_order_id: &str) -> Result<ExchangeOrder>;

    /// Fetch balances, open orders and positions for the given symbols
    async fn fetch_account_snapshot(&self, symbols: &[String]) -> Result<AccountSnapshot>;

    /// Name of the venue, for logs
    fn venue(&self) -> &'static str;
}

/// Streaming market data transport
///
/// One call is one connection session. The session forwards events until the
/// connection drops (returns an error) or `shutdown` fires (returns `Ok`).
/// Reconnection is the caller's job; see [`crate::market::MarketDataFeed`].
#[async_trait]
pub trait MarketStream: Send + Sync {
    /// Connect, subscribe to `symbols` and pump events into `sender`
    async fn run_session(
        &self,
        symbols: &[String],
        sender: mpsc::Sender<MarketEvent>,
        shutdown: CancellationToken,
    ) -> Result<()>;

    /// Name of the venue, for logs
    fn venue(&self) -> &'static str;
}
