//! Market data layer: reconnecting feeds over the exchange stream

pub mod feed;

pub use feed::{symbol_groups, MarketDataFeed, TickFilter};
