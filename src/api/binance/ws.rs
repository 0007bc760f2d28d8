use crate::engine::tick::PriceTick;
use crate::error::{FeedDecodeError, PriceWatchError};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

// Binance USD-M futures, one instrument per socket
const BINANCE_FUTURES_WS_URL: &str = "wss://fstream.binance.com/ws";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct TradeEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p", with = "rust_decimal::serde::str")]
    price: Decimal,
}

pub fn decode_trade(text: &str) -> Result<PriceTick, FeedDecodeError> {
    let trade: TradeEvent = serde_json::from_str(text)?;
    let symbol = trade.symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(FeedDecodeError::EmptySymbol);
    }
    Ok(PriceTick::new(symbol, trade.price))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Reconnecting => "RECONNECTING",
        }
    }
}

/// Receives everything the stream produces. Both calls are made from the
/// receive loop, so a slow `on_tick` holds back the next read.
pub trait StreamHandler: Send + Sync + 'static {
    fn on_tick(&self, tick: PriceTick);
    fn on_state_change(&self, state: ConnectionState);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub base_url: String,
    pub reconnect_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_FUTURES_WS_URL.to_string(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl StreamConfig {
    pub fn stream_url(&self, symbol: &str) -> String {
        format!(
            "{}/{}@trade",
            self.base_url.trim_end_matches('/'),
            symbol.to_lowercase()
        )
    }
}

/// A running subscription to one instrument's trade stream.
///
/// The loop reconnects after a fixed delay on any error or close and only
/// ends once its cancellation token fires.
pub struct StreamClient {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl StreamClient {
    pub fn start(
        config: StreamConfig,
        symbol: &str,
        handler: Arc<dyn StreamHandler>,
        cancel: CancellationToken,
    ) -> Self {
        let url = config.stream_url(symbol);
        let handle = tokio::spawn(run(url, config.reconnect_delay, handler, cancel.clone()));
        Self { cancel, handle }
    }

    /// Returns immediately; the loop notices within one select.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!("Stream task ended abnormally: {}", e);
        }
    }
}

async fn run(
    url: String,
    reconnect_delay: Duration,
    handler: Arc<dyn StreamHandler>,
    cancel: CancellationToken,
) {
    while !cancel.is_cancelled() {
        handler.on_state_change(ConnectionState::Connecting);

        match connect_and_stream(&url, handler.as_ref(), &cancel).await {
            Ok(()) => info!("WebSocket connection closed"),
            Err(e) => error!("WebSocket error: {}", e),
        }

        if cancel.is_cancelled() {
            break;
        }

        handler.on_state_change(ConnectionState::Reconnecting);
        info!("Reconnecting to {} in {:?}", url, reconnect_delay);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }

    info!("Stream for {} stopped", url);
    handler.on_state_change(ConnectionState::Disconnected);
}

async fn connect_and_stream(
    url: &str,
    handler: &dyn StreamHandler,
    cancel: &CancellationToken,
) -> Result<(), PriceWatchError> {
    info!("Connecting to Binance WebSocket: {}", url);

    let (mut ws_stream, _) = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        connected = connect_async(url) => connected?,
    };

    info!("Successfully connected to WebSocket");
    handler.on_state_change(ConnectionState::Connected);

    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if tokio::time::timeout(CLOSE_TIMEOUT, ws_stream.close(None)).await.is_err() {
                    debug!("Close handshake timed out");
                }
                return Ok(());
            }
            message = ws_stream.next() => message,
        };

        match message {
            Some(Ok(tungstenite::protocol::Message::Text(text))) => match decode_trade(&text) {
                Ok(tick) => {
                    // Frames already buffered when the session stops are not delivered.
                    if cancel.is_cancelled() {
                        continue;
                    }
                    debug!("{}", tick);
                    handler.on_tick(tick);
                }
                Err(e) => {
                    warn!("Failed to parse trade data: {}", e);
                }
            },
            Some(Ok(tungstenite::protocol::Message::Close(frame))) => {
                info!("Server closed the connection: {:?}", frame);
                return Ok(());
            }
            Some(Ok(_)) => {} // Ignore other message types
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(()),
        }
    }
}
