// =============================================================================
// WebSocket Gateway — typed request/response, chat stub, tick stream
// =============================================================================
//
// `/ws` implements the typed `{id, ...}` request protocol from spec section
// 6: a client sends `{"id": "...", "op": "...", "params": {...}}` and gets
// back exactly one `{"type": "res", "id": "...", "ok": bool, "payload"}`.
// `/chat` is a named but unimplemented route — chat is out of scope per
// spec section 1 — that returns 501 on upgrade so the contract surface
// still exists. `/api/ticks/stream` subscribes to the Signal Bus and
// forwards every tick as it arrives, for as long as the socket stays open.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::api::auth::validate_token;
use crate::api::rest::ApiState;

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/chat", get(chat_handler))
        .route("/api/ticks/stream", get(ticks_handler))
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    #[serde(default)]
    token: String,
}

fn authorized(token_query: &TokenQuery) -> bool {
    validate_token(&token_query.token)
}

// =============================================================================
// `/ws` — typed request/response
// =============================================================================

#[derive(Debug, Deserialize)]
struct WsRequest {
    id: String,
    op: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct WsResponse {
    #[serde(rename = "type")]
    kind: &'static str,
    id: String,
    ok: bool,
    payload: Value,
}

impl WsResponse {
    fn ok(id: String, payload: Value) -> Self {
        Self { kind: "res", id, ok: true, payload }
    }

    fn err(id: String, message: impl Into<String>) -> Self {
        Self { kind: "res", id, ok: false, payload: json!({ "error": message.into() }) }
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Query(token_query): Query<TokenQuery>,
) -> Response {
    if !authorized(&token_query) {
        return (StatusCode::UNAUTHORIZED, "invalid bearer token").into_response();
    }
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: ApiState) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            if matches!(message, Message::Close(_)) {
                break;
            }
            continue;
        };

        let request: WsRequest = match serde_json::from_str(&text) {
            Ok(req) => req,
            Err(e) => {
                let response = WsResponse::err(String::new(), format!("malformed request: {e}"));
                let _ = send_json(&mut socket, &response).await;
                continue;
            }
        };

        let response = dispatch(&state, &request).await;
        if send_json(&mut socket, &response).await.is_err() {
            break;
        }
    }
}

async fn send_json(socket: &mut WebSocket, value: &impl Serialize) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(text)).await
}

async fn dispatch(state: &ApiState, req: &WsRequest) -> WsResponse {
    state.app.record_request();
    match req.op.as_str() {
        "health" => WsResponse::ok(
            req.id.clone(),
            json!({ "status": "healthy", "uptimeSecs": state.app.uptime_secs() }),
        ),
        "get_market" => {
            let venue = req.params.get("venue").and_then(Value::as_str).unwrap_or_default();
            let market_id = req.params.get("marketId").and_then(Value::as_str).unwrap_or_default();
            match state.app.feed_manager.get_market(market_id, Some(venue)).await {
                Ok(Some(market)) => WsResponse::ok(req.id.clone(), json!(market)),
                Ok(None) => WsResponse::err(req.id.clone(), "market not found"),
                Err(e) => WsResponse::err(req.id.clone(), e.to_string()),
            }
        }
        "search_markets" => {
            let venue = req.params.get("venue").and_then(Value::as_str);
            let query = req.params.get("query").and_then(Value::as_str).unwrap_or_default();
            match state.app.feed_manager.search_markets(query, venue).await {
                Ok(markets) => WsResponse::ok(req.id.clone(), json!(markets)),
                Err(e) => WsResponse::err(req.id.clone(), e.to_string()),
            }
        }
        "performance" => {
            let Some(engine) = &state.app.hft_engine else {
                return WsResponse::ok(req.id.clone(), json!({ "enabled": false }));
            };
            WsResponse::ok(req.id.clone(), json!({ "enabled": true, "stats": engine.positions().stats() }))
        }
        other => WsResponse::err(req.id.clone(), format!("unknown op: {other}")),
    }
}

// =============================================================================
// `/chat` — out of scope, named stub
// =============================================================================

async fn chat_handler() -> Response {
    (StatusCode::NOT_IMPLEMENTED, "chat is out of scope for this gateway").into_response()
}

// =============================================================================
// `/api/ticks/stream` — live tick stream off the Signal Bus
// =============================================================================

async fn ticks_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    Query(token_query): Query<TokenQuery>,
) -> Response {
    if !authorized(&token_query) {
        return (StatusCode::UNAUTHORIZED, "invalid bearer token").into_response();
    }
    ws.on_upgrade(move |socket| stream_ticks(socket, state))
}

async fn stream_ticks(mut socket: WebSocket, state: ApiState) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let listener_id = state.app.signal_bus.on_tick(Box::new(move |update| {
        let _ = tx.send(update.clone());
    }));

    loop {
        tokio::select! {
            tick = rx.recv() => {
                let Some(tick) = tick else { break };
                if send_json(&mut socket, &tick).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(error = %e, "tick stream socket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.app.signal_bus.off_tick(listener_id);
    warn!("tick stream connection closed");
}
