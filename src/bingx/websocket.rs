//! WebSocket market stream for BingX perpetual swap

use async_trait::async_trait;
use flate2::read::GzDecoder;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::io::Read;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::messages::*;
use crate::common::errors::{ClientError, Result};
use crate::common::traits::MarketStream;
use crate::common::types::{ConnectionStatus, DepthSnapshot, MarketEvent, Tick};
use crate::config::types::ExchangeConfig;

const PING: &str = "Ping";
const PONG: &str = "Pong";

/// Streaming market data for one group of symbols per session
#[derive(Debug, Clone)]
pub struct BingxMarketStream {
    /// WebSocket URL
    url: String,
    /// Also subscribe to `depth20` for each symbol
    include_depth: bool,
    /// A session without any inbound frame for this long is considered dead
    idle_timeout: Duration,
}

impl BingxMarketStream {
    pub fn new(config: &ExchangeConfig, heartbeat_interval_seconds: u64) -> Self {
        Self {
            url: config.websocket_url.clone(),
            include_depth: config.include_depth,
            idle_timeout: Duration::from_secs(heartbeat_interval_seconds.max(1) * 3),
        }
    }

    /// Channels subscribed for each symbol
    fn data_types(&self, symbols: &[String]) -> Vec<String> {
        let mut data_types = Vec::new();
        for symbol in symbols {
            data_types.push(format!("{}@bookTicker", symbol));
            data_types.push(format!("{}@lastPrice", symbol));
            if self.include_depth {
                data_types.push(format!("{}@depth20@500ms", symbol));
            }
        }
        data_types
    }
}

/// Decompress a gzip binary frame
pub fn decode_frame(bytes: &[u8]) -> Result<String> {
    let mut decoder = GzDecoder::new(bytes);
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .map_err(|e| ClientError::WebSocketCommunication(format!("gzip decode failed: {}", e)))?;
    Ok(text)
}

#[derive(Debug, Default, Clone)]
struct SymbolBook {
    best_bid: Decimal,
    best_ask: Decimal,
    last_price: Decimal,
    depth: Option<DepthSnapshot>,
}

/// Merges the per-channel pushes of a symbol into full ticks
///
/// A tick is emitted on every book-ticker update; last price and depth are
/// carried forward from their own channels.
#[derive(Debug, Default)]
pub struct TickAssembler {
    books: HashMap<String, SymbolBook>,
}

impl TickAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one decoded frame. `Ok(None)` means nothing to forward.
    pub fn parse_frame(&mut self, text: &str) -> Result<Option<MarketEvent>> {
        let envelope: WsEnvelope = serde_json::from_str(text)?;

        if let Some(code) = envelope.code {
            if code != 0 {
                warn!(code, msg = ?envelope.msg, "Subscription refused");
                return Ok(Some(MarketEvent::Raw {
                    message: text.to_string(),
                }));
            }
        }

        let (Some(data_type), Some(data)) = (envelope.data_type, envelope.data) else {
            // subscription acks carry no data
            return Ok(None);
        };

        if data_type.ends_with("@bookTicker") {
            let ticker: WsBookTicker = serde_json::from_value(data)?;
            return self.on_book_ticker(ticker).map(Some);
        }

        if data_type.ends_with("@lastPrice") {
            let last: WsLastPrice = serde_json::from_value(data)?;
            let price = parse_price(&last.price)?;
            self.books.entry(last.symbol).or_default().last_price = price;
            return Ok(None);
        }

        if data_type.contains("@depth") {
            let symbol = data_type
                .split('@')
                .next()
                .unwrap_or_default()
                .to_string();
            let depth: WsDepth = serde_json::from_value(data)?;
            let snapshot = DepthData {
                timestamp: 0,
                bids: depth.bids,
                asks: depth.asks,
            }
            .into_snapshot();
            self.books.entry(symbol).or_default().depth = Some(snapshot);
            return Ok(None);
        }

        Ok(Some(MarketEvent::Raw {
            message: text.to_string(),
        }))
    }

    fn on_book_ticker(&mut self, ticker: WsBookTicker) -> Result<MarketEvent> {
        let best_bid = parse_price(&ticker.bid_price)?;
        let best_ask = parse_price(&ticker.ask_price)?;

        let book = self.books.entry(ticker.symbol.clone()).or_default();
        book.best_bid = best_bid;
        book.best_ask = best_ask;
        if book.last_price.is_zero() {
            book.last_price = (best_bid + best_ask) / Decimal::from(2);
        }

        Ok(MarketEvent::Tick(Tick {
            symbol: ticker.symbol,
            timestamp: event_time(ticker.event_time),
            best_bid,
            best_ask,
            last_price: book.last_price,
            depth: book.depth.clone(),
        }))
    }
}

fn parse_price(value: &str) -> Result<Decimal> {
    value
        .parse()
        .map_err(|e| ClientError::InvalidResponse(format!("Invalid price '{}': {}", value, e)))
}

#[async_trait]
impl MarketStream for BingxMarketStream {
    #[instrument(skip(self, sender, shutdown), fields(symbols = ?symbols))]
    async fn run_session(
        &self,
        symbols: &[String],
        sender: mpsc::Sender<MarketEvent>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!("Connecting to BingX WebSocket: {}", self.url);

        let (ws_stream, _response) = connect_async(&self.url)
            .await
            .map_err(|e| ClientError::WebSocketConnection(e.to_string()))?;

        info!("WebSocket connection established");
        let _ = sender
            .send(MarketEvent::ConnectionStatus {
                status: ConnectionStatus::Connected,
            })
            .await;

        let (mut write, mut read) = ws_stream.split();

        for data_type in self.data_types(symbols) {
            let msg_json = serde_json::to_string(&WsSubscribeMessage::subscribe(data_type))?;
            debug!("Sending subscription message: {}", msg_json);
            write.send(Message::Text(msg_json)).await?;
        }

        let mut assembler = TickAssembler::new();
        let mut idle_check = interval(self.idle_timeout / 3);
        let mut last_frame = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, closing WebSocket");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = idle_check.tick() => {
                    if last_frame.elapsed() > self.idle_timeout {
                        return Err(ClientError::Timeout(format!(
                            "no frames for {:?}",
                            self.idle_timeout
                        )));
                    }
                }
                msg = read.next() => {
                    last_frame = Instant::now();
                    let text = match msg {
                        Some(Ok(Message::Binary(bytes))) => decode_frame(&bytes)?,
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                            continue;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Err(ClientError::WebSocketConnection(format!(
                                "closed by server: {:?}",
                                frame.map(|f| f.reason.to_string())
                            )));
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            return Err(ClientError::WebSocketConnection(
                                "stream ended".to_string(),
                            ));
                        }
                    };

                    if text == PING {
                        write.send(Message::Text(PONG.to_string())).await?;
                        let _ = sender.try_send(MarketEvent::Heartbeat);
                        continue;
                    }

                    let event = match assembler.parse_frame(&text) {
                        Ok(Some(event)) => event,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!("Failed to parse message: {} - {}", e, text);
                            MarketEvent::Raw { message: text }
                        }
                    };

                    if sender.send(event).await.is_err() {
                        debug!("Event receiver dropped, ending session");
                        return Ok(());
                    }
                }
            }
        }
    }

    fn venue(&self) -> &'static str {
        "bingx"
    }
}
