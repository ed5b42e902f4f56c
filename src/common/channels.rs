//! Channel type definitions for inter-task communication

use tokio::sync::{broadcast, mpsc};

use super::types::MarketEvent;
use crate::execution::OrderEvent;

/// Default channel buffer size
pub const DEFAULT_CHANNEL_SIZE: usize = 1000;

/// Buffer for per-symbol pipeline queues
pub const PIPELINE_CHANNEL_SIZE: usize = 256;

/// Create a new market event channel with the default buffer size
pub fn create_event_channel() -> (mpsc::Sender<MarketEvent>, mpsc::Receiver<MarketEvent>) {
    mpsc::channel(DEFAULT_CHANNEL_SIZE)
}

/// Create a new market event channel with a custom buffer size
pub fn create_event_channel_with_size(
    size: usize,
) -> (mpsc::Sender<MarketEvent>, mpsc::Receiver<MarketEvent>) {
    mpsc::channel(size)
}

/// Create the broadcast channel carrying order lifecycle events
pub fn create_order_event_channel() -> (broadcast::Sender<OrderEvent>, broadcast::Receiver<OrderEvent>) {
    broadcast::channel(DEFAULT_CHANNEL_SIZE)
}
