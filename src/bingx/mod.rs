//! BingX module - REST and WebSocket adapter for the BingX perpetual swap API

pub mod auth;
pub mod messages;
pub mod rest;
pub mod websocket;

pub use auth::{HmacSigner, RequestSigner, SignatureEncoding};
pub use rest::BingxRestClient;
pub use websocket::BingxMarketStream;
