// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Serves the gateway surface spec section 6 names: `GET /health` (public,
// `?deep=true` for an extended check), `GET /metrics`, `GET /api/commands`,
// `POST /api/backtest`, `GET /api/performance`,
// `GET /api/features/:venue/:marketId`. Every route but `/health` is gated
// by `AuthBearer`. Requests are rate-limited per client IP with `governor`
// and carry security headers on every response; CORS follows
// `Config.gateway.cors`.
// =============================================================================

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::config::CorsMode;
use crate::hft::strategies::{evaluate_all, EvalContext, StrategyConfigs};
use crate::hft::{CryptoMarket, PriceBuffer};
use crate::types::Direction;

type IpLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

#[derive(Clone)]
pub(crate) struct ApiState {
    pub(crate) app: Arc<AppState>,
    limiter: Arc<IpLimiter>,
    limit_per_min: u32,
}

pub fn router(app: Arc<AppState>) -> Router {
    let (cors, limit_per_min) = {
        let config = app.config.read();
        (build_cors_layer(&config.gateway.cors), config.gateway.rate_limit_per_min)
    };

    let quota = Quota::per_minute(NonZeroU32::new(limit_per_min.max(1)).unwrap());
    let state = ApiState {
        app,
        limiter: Arc::new(RateLimiter::keyed(quota)),
        limit_per_min,
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/commands", get(commands_handler))
        .route("/api/backtest", post(backtest_handler))
        .route("/api/performance", get(performance_handler))
        .route("/api/features/:venue/:market_id", get(features_handler))
        .merge(crate::api::ws::router())
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(cors: &crate::config::CorsConfig) -> CorsLayer {
    match cors.mode {
        CorsMode::Disabled => CorsLayer::new(),
        CorsMode::Wildcard => CorsLayer::new().allow_origin(AllowOrigin::any()),
        CorsMode::AllowList => {
            let origins: Vec<HeaderValue> = cors
                .allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok())
                .collect();
            CorsLayer::new().allow_origin(origins).allow_credentials(true)
        }
    }
}

// =============================================================================
// Rate limiting
// =============================================================================

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let ip = req
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(IpAddr::from([0, 0, 0, 0]));

    match state.limiter.check_key(&ip) {
        Ok(_) => {
            let mut response = next.run(req).await;
            if let Ok(value) = HeaderValue::from_str(&state.limit_per_min.to_string()) {
                response.headers_mut().insert("X-RateLimit-Limit", value);
            }
            response
        }
        Err(not_until) => {
            let retry_after = not_until.wait_time_from(DefaultClock::default().now()).as_secs();
            warn!(ip = %ip, retry_after, "rate limit exceeded");
            let body = Json(json!({ "error": "rate limit exceeded", "retryAfter": retry_after }));
            let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", value.clone());
                response.headers_mut().insert("X-RateLimit-Reset", value);
            }
            response
        }
    }
}

async fn security_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert("X-XSS-Protection", HeaderValue::from_static("1; mode=block"));
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );
    response
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Debug, Deserialize)]
struct HealthQuery {
    #[serde(default)]
    deep: bool,
}

async fn health_handler(State(state): State<ApiState>, Query(q): Query<HealthQuery>) -> Response {
    state.app.record_request();
    let mut services = json!({});
    let mut status = "healthy";

    if q.deep {
        let venues = state.app.feed_manager.venues();
        services["feed_manager"] = json!({ "venues": venues });
        services["venue_socket_manager"] = json!({ "active": true });
        services["cron_service"] = json!({ "jobs": state.app.cron_service.jobs().len() });
        if state.app.error_count() > 0 {
            status = "degraded";
        }
    }

    let body = json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptimeSecs": state.app.uptime_secs(),
        "services": services,
    });

    let code = if status == "unhealthy" { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    (code, Json(body)).into_response()
}

async fn metrics_handler(State(state): State<ApiState>, _auth: AuthBearer) -> Response {
    state.app.record_request();
    let body = json!({
        "uptimeSecs": state.app.uptime_secs(),
        "requestCount": state.app.request_count(),
        "errorCount": state.app.error_count(),
        "recentErrors": state.app.recent_errors(),
    });
    Json(body).into_response()
}

async fn commands_handler(State(state): State<ApiState>, _auth: AuthBearer) -> Response {
    state.app.record_request();
    let commands = json!([
        { "name": "health", "description": "Report process and subsystem health" },
        { "name": "metrics", "description": "Report request/error counters" },
        { "name": "backtest", "description": "Replay a strategy over a synthetic tick sequence" },
        { "name": "performance", "description": "Report HFT engine position performance" },
        { "name": "features", "description": "Report the current market/orderbook feature snapshot" },
    ]);
    Json(json!({ "commands": commands })).into_response()
}

#[derive(Debug, Deserialize)]
struct BacktestTick {
    ts_ms: i64,
    spot_price: f64,
    poly_up_price: f64,
    poly_down_price: f64,
}

#[derive(Debug, Deserialize)]
struct BacktestRequest {
    asset: String,
    up_token_id: String,
    down_token_id: String,
    ticks: Vec<BacktestTick>,
    #[serde(default)]
    strategies: Option<StrategyConfigs>,
}

#[derive(Debug, Serialize)]
struct BacktestSignalOut {
    ts_ms: i64,
    strategy: String,
    direction: Direction,
    confidence: f64,
}

async fn backtest_handler(
    State(state): State<ApiState>,
    _auth: AuthBearer,
    Json(req): Json<BacktestRequest>,
) -> Response {
    state.app.record_request();

    let configs = req.strategies.unwrap_or_default();
    let spot = PriceBuffer::new();
    let poly_up = PriceBuffer::new();
    let poly_down = PriceBuffer::new();
    let mut signals = Vec::new();

    let expires_at = req.ticks.last().map(|t| t.ts_ms + 900_000).unwrap_or(900_000);

    for tick in &req.ticks {
        spot.push(tick.spot_price, tick.ts_ms);
        poly_up.push(tick.poly_up_price, tick.ts_ms);
        poly_down.push(tick.poly_down_price, tick.ts_ms);

        let market = CryptoMarket {
            asset: req.asset.clone(),
            market_id: format!("backtest-{}", req.asset),
            up_token_id: req.up_token_id.clone(),
            down_token_id: req.down_token_id.clone(),
            up_price: tick.poly_up_price,
            down_price: tick.poly_down_price,
            condition_id: format!("backtest-{}", req.asset),
            expires_at,
        };
        let seconds_to_expiry = ((expires_at - tick.ts_ms) as f64 / 1000.0).max(0.0);

        let ctx = EvalContext {
            market: &market,
            spot: &spot,
            poly_up: &poly_up,
            poly_down: &poly_down,
            up_book: None,
            down_book: None,
            round_age_sec: 0.0,
            seconds_to_expiry,
            poly_age_sec: 0.0,
            now_ms: tick.ts_ms,
        };

        if let Some(signal) = evaluate_all(&ctx, &configs) {
            signals.push(BacktestSignalOut {
                ts_ms: tick.ts_ms,
                strategy: signal.strategy,
                direction: signal.direction,
                confidence: signal.confidence,
            });
        }
    }

    Json(json!({ "signalCount": signals.len(), "signals": signals })).into_response()
}

async fn performance_handler(State(state): State<ApiState>, _auth: AuthBearer) -> Response {
    state.app.record_request();

    let Some(engine) = &state.app.hft_engine else {
        return Json(json!({ "enabled": false })).into_response();
    };

    let stats = engine.positions().stats();
    let recent: Vec<_> = engine
        .positions()
        .closed_positions()
        .into_iter()
        .rev()
        .take(50)
        .collect();

    Json(json!({
        "enabled": true,
        "stats": stats,
        "recentTrades": recent,
    }))
    .into_response()
}

async fn features_handler(
    State(state): State<ApiState>,
    _auth: AuthBearer,
    Path((venue, market_id)): Path<(String, String)>,
) -> Response {
    state.app.record_request();

    let market = match state.app.feed_manager.get_market(&market_id, Some(&venue)).await {
        Ok(m) => m,
        Err(e) => {
            state.app.push_error(format!("features lookup failed: {e}"));
            return (StatusCode::BAD_GATEWAY, Json(json!({ "error": e.to_string() }))).into_response();
        }
    };

    let Some(market) = market else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "market not found" }))).into_response();
    };

    let token_id = market.outcomes.first().map(|o| o.id.clone()).unwrap_or_default();
    let orderbook = state
        .app
        .feed_manager
        .get_orderbook(&venue, &token_id)
        .await
        .ok()
        .flatten();

    let body: Value = json!({
        "market": market,
        "orderbook": orderbook,
    });
    Json(body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_disabled_has_no_allow_origin_by_default() {
        let cfg = crate::config::CorsConfig::default();
        assert_eq!(cfg.mode, CorsMode::Disabled);
        // Layer construction should not panic for the default config.
        let _layer = build_cors_layer(&cfg);
    }
}
