//! Token-bucket limiter for outbound exchange requests

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::errors::{ClientError, Result};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Shared token bucket sized to the exchange's documented quota
///
/// Callers block until capacity is available. If a wait budget is configured
/// and it elapses first, the call fails with `RateLimit` instead.
#[derive(Clone)]
pub struct RequestLimiter {
    limiter: Arc<DirectLimiter>,
    max_wait: Option<Duration>,
}

impl RequestLimiter {
    /// `per_second` sustained requests with bursts of up to `burst`
    pub fn new(per_second: u32, burst: u32, max_wait: Option<Duration>) -> Result<Self> {
        let rate = NonZeroU32::new(per_second).ok_or_else(|| {
            ClientError::Configuration("requests_per_second must be greater than zero".to_string())
        })?;
        let burst = NonZeroU32::new(burst.max(1)).unwrap_or(rate);

        let quota = Quota::per_second(rate).allow_burst(burst);
        Ok(Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            max_wait,
        })
    }

    /// Wait for one request slot
    pub async fn acquire(&self) -> Result<()> {
        if self.limiter.check().is_ok() {
            return Ok(());
        }

        debug!("Request bucket empty, waiting for capacity");
        match self.max_wait {
            Some(budget) => tokio::time::timeout(budget, self.limiter.until_ready())
                .await
                .map_err(|_| ClientError::RateLimit {
                    message: format!("no request capacity within {:?}", budget),
                    retry_after_seconds: None,
                }),
            None => {
                self.limiter.until_ready().await;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for RequestLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLimiter")
            .field("max_wait", &self.max_wait)
            .finish()
    }
}
