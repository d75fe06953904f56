// =============================================================================
// Per-user authenticated venue socket — connection state machine
// =============================================================================
//
// One task per user drives the socket through
// disconnected -> connecting -> open_unsubscribed -> subscribed -> (closing)
// -> disconnected. Reconnection uses bounded exponential backoff (1.5x,
// capped at 60s, at most 10 attempts). Every inbound event first checks
// that this socket is still the manager's current socket for its user —
// a torn-down socket's background task must not mutate state for whatever
// replaced it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::event_emitter::{EventEmitter, ListenerId};
use crate::venue_socket::manager::VenueSocketManager;
use crate::venue_socket::types::{
    Credentials, Fill, FillStatus, OrderEvent, OrderEventKind, SocketState, VenueSocketError,
};

const INITIAL_RECONNECT_DELAY_MS: f64 = 5_000.0;
const RECONNECT_BACKOFF_MULTIPLIER: f64 = 1.5;
const MAX_RECONNECT_DELAY_MS: f64 = 60_000.0;
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const PING_INTERVAL: Duration = Duration::from_secs(10);

pub struct UserSocket {
    pub venue: String,
    pub user_id: String,
    ws_url: String,
    credentials: Credentials,
    state: RwLock<SocketState>,
    reconnect_attempts: AtomicU32,
    backoff_ms: RwLock<f64>,
    stale: AtomicBool,
    fills: EventEmitter<Fill>,
    order_events: EventEmitter<OrderEvent>,
    terminal_errors: EventEmitter<VenueSocketError>,
    manager: Weak<VenueSocketManager>,
}

impl UserSocket {
    pub fn new(
        venue: impl Into<String>,
        user_id: impl Into<String>,
        ws_url: impl Into<String>,
        credentials: Credentials,
        manager: Weak<VenueSocketManager>,
    ) -> Arc<Self> {
        Arc::new(Self {
            venue: venue.into(),
            user_id: user_id.into(),
            ws_url: ws_url.into(),
            credentials,
            state: RwLock::new(SocketState::Disconnected),
            reconnect_attempts: AtomicU32::new(0),
            backoff_ms: RwLock::new(INITIAL_RECONNECT_DELAY_MS),
            stale: AtomicBool::new(false),
            fills: EventEmitter::new("fill"),
            order_events: EventEmitter::new("order_event"),
            terminal_errors: EventEmitter::new("venue_socket_terminal_error"),
            manager,
        })
    }

    pub fn state(&self) -> SocketState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), SocketState::Subscribed)
    }

    pub fn on_fill(&self, listener: Box<dyn Fn(&Fill) + Send + Sync>) -> ListenerId {
        self.fills.on(listener)
    }

    pub fn on_order_event(&self, listener: Box<dyn Fn(&OrderEvent) + Send + Sync>) -> ListenerId {
        self.order_events.on(listener)
    }

    pub fn on_terminal_error(
        &self,
        listener: Box<dyn Fn(&VenueSocketError) + Send + Sync>,
    ) -> ListenerId {
        self.terminal_errors.on(listener)
    }

    /// True iff this socket is still the one the manager holds for its
    /// user. A background task observes this going false and stops
    /// mutating state.
    fn is_current(&self, socket: &Arc<Self>) -> bool {
        let Some(manager) = self.manager.upgrade() else {
            return false;
        };
        manager.is_current(&self.user_id, socket)
    }

    /// Cancel any pending reconnect/ping work, close with code 1000, and
    /// mark the socket stale so any in-flight callback becomes a no-op.
    pub fn disconnect(&self) {
        *self.state.write() = SocketState::Closing;
        self.stale.store(true, Ordering::SeqCst);
    }

    /// Drive the connect/read/reconnect loop. Spawned once per socket by
    /// the manager; returns once the socket is disconnected by the user or
    /// exhausts its reconnect budget.
    pub async fn run(socket: Arc<Self>) {
        loop {
            if socket.stale.load(Ordering::SeqCst) || !socket.is_current(&socket) {
                return;
            }

            *socket.state.write() = SocketState::Connecting;
            match socket.connect_and_stream().await {
                Ok(()) => {
                    // Read loop exited because of an explicit disconnect.
                    return;
                }
                Err(close_code) => {
                    if socket.stale.load(Ordering::SeqCst) || !socket.is_current(&socket) {
                        return;
                    }
                    if close_code == Some(1000) {
                        return;
                    }

                    let attempts = socket.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempts >= MAX_RECONNECT_ATTEMPTS {
                        warn!(
                            user_id = %socket.user_id,
                            venue = %socket.venue,
                            attempts,
                            "max reconnect attempts exceeded"
                        );
                        socket
                            .terminal_errors
                            .emit(&VenueSocketError::MaxReconnectAttemptsExceeded(attempts));
                        *socket.state.write() = SocketState::Disconnected;
                        return;
                    }

                    let delay_ms = *socket.backoff_ms.read();
                    let next = (delay_ms * RECONNECT_BACKOFF_MULTIPLIER).min(MAX_RECONNECT_DELAY_MS);
                    *socket.backoff_ms.write() = next;

                    info!(
                        user_id = %socket.user_id,
                        venue = %socket.venue,
                        attempts,
                        delay_ms,
                        "scheduling venue socket reconnect"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
                }
            }
        }
    }

    /// Returns `Ok(())` on a user-initiated close, `Err(close_code)` on
    /// anything that should trigger reconnect evaluation.
    async fn connect_and_stream(self: &Arc<Self>) -> Result<(), Option<u16>> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.ws_url)
            .await
            .map_err(|err| {
                warn!(user_id = %self.user_id, venue = %self.venue, error = %err, "venue socket connect failed");
                None
            })?;

        if self.stale.load(Ordering::SeqCst) || !self.is_current(self) {
            return Ok(());
        }

        let (write, mut read) = ws_stream.split();
        let write = Arc::new(AsyncMutex::new(write));

        *self.state.write() = SocketState::OpenUnsubscribed;

        let subscribe = json!({
            "type": "subscribe",
            "channel": "user",
            "auth": {
                "apiKey": self.credentials.api_key,
                "secret": self.credentials.secret,
                "passphrase": self.credentials.passphrase,
            },
        });
        {
            let mut sink = write.lock().await;
            if sink
                .send(WsMessage::Text(subscribe.to_string()))
                .await
                .is_err()
            {
                return Err(None);
            }
        }

        let ping_handle = {
            let write = Arc::clone(&write);
            let socket = Arc::clone(self);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(PING_INTERVAL);
                loop {
                    ticker.tick().await;
                    if socket.stale.load(Ordering::SeqCst) || !socket.is_current(&socket) {
                        return;
                    }
                    let mut sink = write.lock().await;
                    if sink
                        .send(WsMessage::Text(json!({"type": "ping"}).to_string()))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            })
        };

        let result = loop {
            if self.stale.load(Ordering::SeqCst) || !self.is_current(self) {
                break Ok(());
            }
            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    self.handle_message(&text);
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    break Err(code);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(user_id = %self.user_id, error = %err, "venue socket read error");
                    break Err(None);
                }
                None => break Err(None),
            }
        };

        ping_handle.abort();
        result
    }

    fn handle_message(self: &Arc<Self>, text: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
            return;
        };
        let msg_type = value
            .get("type")
            .and_then(|v| v.as_str())
            .or_else(|| value.get("event_type").and_then(|v| v.as_str()))
            .unwrap_or("");

        match msg_type {
            "pong" => {}
            "subscribed" => {
                let channel_matches = value.get("channel").and_then(|v| v.as_str()) == Some("user");
                if channel_matches {
                    *self.state.write() = SocketState::Subscribed;
                    self.reconnect_attempts.store(0, Ordering::SeqCst);
                    *self.backoff_ms.write() = INITIAL_RECONNECT_DELAY_MS;
                    info!(user_id = %self.user_id, venue = %self.venue, "venue socket subscribed");
                }
            }
            "trade" => {
                if let Some(fill) = parse_fill(&value) {
                    self.fills.emit(&fill);
                }
            }
            "order" => {
                if let Some(event) = parse_order_event(&value) {
                    self.order_events.emit(&event);
                }
            }
            _ => {
                debug!(user_id = %self.user_id, msg_type, "unrecognized venue socket message");
            }
        }
    }
}

fn parse_fill(value: &serde_json::Value) -> Option<Fill> {
    Some(Fill {
        order_id: value.get("orderId")?.as_str()?.to_string(),
        market_id: value.get("marketId")?.as_str()?.to_string(),
        token_id: value.get("tokenId")?.as_str()?.to_string(),
        side: match value.get("side")?.as_str()? {
            "BUY" | "buy" => crate::types::Side::Buy,
            _ => crate::types::Side::Sell,
        },
        size: value.get("size")?.as_f64()?,
        price: value.get("price")?.as_f64()?,
        status: match value.get("status").and_then(|v| v.as_str()).unwrap_or("") {
            "MINED" => FillStatus::Mined,
            "CONFIRMED" => FillStatus::Confirmed,
            "FAILED" => FillStatus::Failed,
            _ => FillStatus::Matched,
        },
        timestamp: value.get("timestamp").and_then(|v| v.as_i64()).unwrap_or(0),
        tx_hash: value
            .get("transactionHash")
            .and_then(|v| v.as_str())
            .map(String::from),
    })
}

fn parse_order_event(value: &serde_json::Value) -> Option<OrderEvent> {
    Some(OrderEvent {
        order_id: value.get("orderId")?.as_str()?.to_string(),
        market_id: value.get("marketId")?.as_str()?.to_string(),
        token_id: value.get("tokenId")?.as_str()?.to_string(),
        kind: OrderEventKind::parse(value.get("type").and_then(|v| v.as_str()).unwrap_or("")),
        side: match value.get("side")?.as_str()? {
            "BUY" | "buy" => crate::types::Side::Buy,
            _ => crate::types::Side::Sell,
        },
        price: value.get("price")?.as_f64()?,
        original_size: value.get("originalSize").and_then(|v| v.as_f64()).unwrap_or(0.0),
        size_matched: value.get("sizeMatched").and_then(|v| v.as_f64()).unwrap_or(0.0),
        timestamp: value.get("timestamp").and_then(|v| v.as_i64()).unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribed_ack_requires_matching_channel() {
        let bad = json!({"type": "subscribed", "channel": "market"});
        assert_ne!(bad.get("channel").and_then(|v| v.as_str()), Some("user"));
        let good = json!({"type": "subscribed", "channel": "user"});
        assert_eq!(good.get("channel").and_then(|v| v.as_str()), Some("user"));
    }

    #[test]
    fn parse_fill_defaults_status_to_matched() {
        let value = json!({
            "orderId": "o1", "marketId": "m1", "tokenId": "t1",
            "side": "BUY", "size": 10.0, "price": 0.5, "timestamp": 1000,
        });
        let fill = parse_fill(&value).unwrap();
        assert_eq!(fill.status, FillStatus::Matched);
    }
}
