//! Common types and utilities shared across the engine

pub mod channels;
pub mod errors;
pub mod rate_limit;
pub mod retry;
pub mod traits;
pub mod types;
