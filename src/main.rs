// =============================================================================
// CLODDS Core — Main Entry Point
// =============================================================================
//
// Boots the core services in dependency order: Config -> Feed Manager ->
// Signal Bus -> Storage -> Cron Service -> (optional) HFT Engine -> Venue
// Socket Manager -> Gateway. Each long-running service is started
// explicitly and stopped explicitly on shutdown; nothing here is a global
// singleton.
// =============================================================================

mod api;
mod app_state;
mod config;
mod cron;
mod event_emitter;
mod execution;
mod feed;
mod hft;
mod signal_bus;
mod storage;
mod types;
mod venue_socket;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::Config;
use crate::cron::CronService;
use crate::execution::{ExecutionAdapter, OrderRequest, OrderResult};
use crate::feed::{BinanceSpotAdapter, FeedAdapter, FeedManager};
use crate::hft::{HftEngine, MarketScanner};
use crate::signal_bus::SignalBus;
use crate::storage::Storage;
use crate::venue_socket::VenueSocketManager;

const CONFIG_PATH: &str = "clodds_config.json";
const STORAGE_PATH: &str = "clodds.sqlite3";

/// Stand-in execution backend for standalone operation. Venue trading
/// clients are an external collaborator per spec section 3 (Non-goals);
/// this adapter logs the order and reports a simulated fill at the
/// requested price so the engine can run end-to-end without one configured.
struct LoggingExecutionAdapter;

#[async_trait]
impl ExecutionAdapter for LoggingExecutionAdapter {
    async fn buy_limit(&self, req: OrderRequest) -> OrderResult {
        info!(venue = %req.venue, market = %req.market_id, price = req.price, size = req.size, "simulated buy");
        OrderResult {
            success: true,
            order_id: Some(uuid::Uuid::new_v4().to_string()),
            filled_size: Some(req.size),
            avg_fill_price: Some(req.price),
            error: None,
        }
    }

    async fn sell_limit(&self, req: OrderRequest) -> OrderResult {
        info!(venue = %req.venue, market = %req.market_id, price = req.price, size = req.size, "simulated sell");
        OrderResult {
            success: true,
            order_id: Some(uuid::Uuid::new_v4().to_string()),
            filled_size: Some(req.size),
            avg_fill_price: Some(req.price),
            error: None,
        }
    }

    async fn cancel_order(&self, venue: &str, order_id: &str) -> OrderResult {
        info!(venue, order_id, "simulated cancel");
        OrderResult { success: true, order_id: Some(order_id.to_string()), filled_size: None, avg_fill_price: None, error: None }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("clodds-core starting up");

    let config = Config::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });

    // ── Feed Manager ──────────────────────────────────────────────────────
    let mut adapters: HashMap<String, Arc<dyn FeedAdapter>> = HashMap::new();

    let spot_assets = config.hft.assets.clone();
    if config.feed_enabled(&config.hft.spot_venue) || config.hft.spot_venue == "binance" {
        let binance = BinanceSpotAdapter::new(spot_assets.clone());
        binance.start_concrete();
        adapters.insert(binance.venue(), binance);
    }

    let feed_manager = FeedManager::new(adapters);
    info!(venues = ?feed_manager.venues(), "feed manager constructed");

    // ── Signal Bus ────────────────────────────────────────────────────────
    let signal_bus = Arc::new(SignalBus::new());
    signal_bus.connect_feeds(&feed_manager);

    // ── Storage ───────────────────────────────────────────────────────────
    let storage = Arc::new(Storage::open(STORAGE_PATH).unwrap_or_else(|e| {
        error!(error = %e, "failed to open storage, falling back to in-memory");
        Storage::open_in_memory().expect("in-memory storage must open")
    }));

    // ── Cron Service ──────────────────────────────────────────────────────
    let alerts: Arc<dyn cron::AlertRepository> = storage.clone();
    let send_message: Arc<dyn Fn(&str, &str) + Send + Sync> =
        Arc::new(|user_id: &str, text: &str| info!(user_id, text, "alert message"));
    let cron_service = CronService::new(feed_manager.clone(), alerts, send_message, None);

    // ── HFT Engine (only when a spot feed is registered for it) ──────────
    let hft_engine: Option<Arc<HftEngine>> = if feed_manager.venues().contains(&config.hft.spot_venue) {
        let scanner = MarketScanner::new(
            feed_manager.clone(),
            config.hft.venue.clone(),
            config.hft.assets.clone(),
            config.hft.scanner.clone(),
        );
        let execution: Arc<dyn ExecutionAdapter> = Arc::new(LoggingExecutionAdapter);
        let engine = HftEngine::new(config.hft.clone(), signal_bus.clone(), scanner, execution);
        engine.start();
        Some(engine)
    } else {
        warn!(spot_venue = %config.hft.spot_venue, "no feed adapter for configured spot venue, hft engine disabled");
        None
    };

    // ── Per-User Venue Socket Manager ─────────────────────────────────────
    let venue_socket_manager = VenueSocketManager::new();

    // ── Shared state + gateway ────────────────────────────────────────────
    let gateway_port = config.gateway.port;
    let gateway_bind = config.gateway.bind.clone();

    let state = Arc::new(AppState::new(
        config,
        feed_manager.clone(),
        signal_bus.clone(),
        cron_service.clone(),
        hft_engine.clone(),
        venue_socket_manager,
        storage,
    ));

    feed_manager.start().await;
    cron_service.start();

    let bind_addr: SocketAddr = format!("{gateway_bind}:{gateway_port}")
        .parse()
        .unwrap_or_else(|_| ([0, 0, 0, 0], 3001).into());

    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "gateway listening");

    let server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .expect("gateway server failed");
    });

    info!("all subsystems running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");

    server.abort();
    cron_service.stop();
    feed_manager.stop().await;
    signal_bus.disconnect_feeds();
    if let Some(engine) = &hft_engine {
        engine.stop();
    }

    info!("clodds-core shut down complete");
    Ok(())
}
