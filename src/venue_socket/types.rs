// =============================================================================
// Per-User Venue Socket — wire contracts and error kind
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::Side;

/// Credentials carried in the outbound `subscribe` message. Venues that
/// require additional signed headers attach them to `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub secret: String,
    #[serde(default)]
    pub passphrase: String,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Connection state machine. See `UserSocket` for the transition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Disconnected,
    Connecting,
    OpenUnsubscribed,
    Subscribed,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FillStatus {
    Matched,
    Mined,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub market_id: String,
    pub token_id: String,
    pub side: Side,
    pub size: f64,
    pub price: f64,
    pub status: FillStatus,
    pub timestamp: i64,
    #[serde(default)]
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEventKind {
    Placement,
    Update,
    Cancellation,
}

impl OrderEventKind {
    /// Unknown type strings fall back to `Update`.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "placement" => Self::Placement,
            "cancellation" => Self::Cancellation,
            "update" => Self::Update,
            _ => Self::Update,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: String,
    pub market_id: String,
    pub token_id: String,
    #[serde(rename = "type")]
    pub kind: OrderEventKind,
    pub side: Side,
    pub price: f64,
    pub original_size: f64,
    pub size_matched: f64,
    pub timestamp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum VenueSocketError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("max reconnect attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_order_event_type_falls_back_to_update() {
        assert_eq!(OrderEventKind::parse("weird"), OrderEventKind::Update);
        assert_eq!(OrderEventKind::parse("PLACEMENT"), OrderEventKind::Placement);
    }
}
