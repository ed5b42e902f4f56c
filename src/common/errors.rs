//! Error types for the application

use thiserror::Error;

/// Result type alias using our ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Main error type for exchange and infrastructure operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// Missing or invalid configuration/credentials. Fatal.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The exchange refused our credentials or signature. Fatal.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Rate limiting errors (local bucket wait timed out, or exchange throttling)
    #[error("Rate limit exceeded: {message}, retry after {retry_after_seconds:?} seconds")]
    RateLimit {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    /// Transient network failure that survived every retry attempt
    #[error("Network error after {attempts} attempt(s): {message}")]
    Network { message: String, attempts: u32 },

    /// Order refused by the exchange for business reasons
    #[error("Rejected by exchange (code {code}): {reason}")]
    Rejected { code: i64, reason: String },

    /// Order or resource unknown to the exchange
    #[error("Not found: {0}")]
    NotFound(String),

    /// Order already reached a terminal state on the exchange
    #[error("Order already terminal: {0}")]
    AlreadyTerminal(String),

    /// HTTP request errors
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Invalid API response
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// WebSocket connection errors
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    /// WebSocket send/receive errors
    #[error("WebSocket communication error: {0}")]
    WebSocketCommunication(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Channel send errors
    #[error("Channel send error: {0}")]
    ChannelSend(String),

    /// Channel receive errors
    #[error("Channel receive error: {0}")]
    ChannelReceive(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Whether a request that failed this way may be retried with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network { .. } | ClientError::Timeout(_) => true,
            ClientError::RateLimit { .. } => true,
            ClientError::HttpRequest(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().map(|s| s.is_server_error()).unwrap_or(false)
            }
            ClientError::WebSocketConnection(_) | ClientError::WebSocketCommunication(_) => true,
            _ => false,
        }
    }

    /// Whether continuing to trade after this error is unsafe
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Authentication(_) | ClientError::Configuration(_)
        )
    }

    /// Whether the outcome of the failed request is unknown to us
    ///
    /// A submission that failed this way may or may not have reached the exchange.
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            ClientError::Network { .. } | ClientError::Timeout(_) | ClientError::HttpRequest(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocketCommunication(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ClientError::Authentication("bad key".into()).is_fatal());
        assert!(ClientError::Configuration("missing API_KEY".into()).is_fatal());
        assert!(!ClientError::NotFound("x".into()).is_fatal());
        assert!(!ClientError::Network {
            message: "reset".into(),
            attempts: 3
        }
        .is_fatal());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::Timeout("read".into()).is_retryable());
        assert!(ClientError::RateLimit {
            message: "busy".into(),
            retry_after_seconds: Some(1)
        }
        .is_retryable());
        assert!(!ClientError::Authentication("nope".into()).is_retryable());
        assert!(!ClientError::Rejected {
            code: 101204,
            reason: "Insufficient margin".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_indeterminate_only_for_transport_failures() {
        assert!(ClientError::Network {
            message: "timeout".into(),
            attempts: 5
        }
        .is_indeterminate());
        assert!(!ClientError::Rejected {
            code: 1,
            reason: "x".into()
        }
        .is_indeterminate());
        assert!(!ClientError::RateLimit {
            message: "x".into(),
            retry_after_seconds: None
        }
        .is_indeterminate());
    }
}
