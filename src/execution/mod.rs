//! Order execution: lifecycle state machine, idempotency keys and the engine

pub mod engine;
pub mod idempotency;
pub mod order;

pub use engine::ExecutionEngine;
pub use idempotency::KeyGenerator;
pub use order::{ExecutionError, Fill, Order, OrderEvent};
