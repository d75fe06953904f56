// =============================================================================
// Application State — composes the core services behind a single handle
// =============================================================================
//
// Every service is constructed and started in `main.rs`; `AppState` only
// holds the `Arc`s the gateway handlers need and a small amount of its own
// bookkeeping (request/error counters for `/metrics`, a recent-error ring
// for `/health?deep=true`). No global singletons — everything here is
// passed in at construction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::Config;
use crate::cron::CronService;
use crate::feed::FeedManager;
use crate::hft::HftEngine;
use crate::signal_bus::SignalBus;
use crate::storage::Storage;
use crate::venue_socket::VenueSocketManager;

const MAX_RECENT_ERRORS: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub at_ms: i64,
}

pub struct AppState {
    pub config: RwLock<Config>,
    pub feed_manager: Arc<FeedManager>,
    pub signal_bus: Arc<SignalBus>,
    pub cron_service: Arc<CronService>,
    pub hft_engine: Option<Arc<HftEngine>>,
    pub venue_socket_manager: Arc<VenueSocketManager>,
    pub storage: Arc<Storage>,
    start_time: Instant,
    request_count: AtomicU64,
    error_count: AtomicU64,
    recent_errors: RwLock<Vec<ErrorRecord>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        feed_manager: Arc<FeedManager>,
        signal_bus: Arc<SignalBus>,
        cron_service: Arc<CronService>,
        hft_engine: Option<Arc<HftEngine>>,
        venue_socket_manager: Arc<VenueSocketManager>,
        storage: Arc<Storage>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            feed_manager,
            signal_bus,
            cron_service,
            hft_engine,
            venue_socket_manager,
            storage,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            recent_errors: RwLock::new(Vec::new()),
        }
    }

    pub fn record_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        let mut errors = self.recent_errors.write();
        errors.push(ErrorRecord {
            message: message.into(),
            at_ms: chrono::Utc::now().timestamp_millis(),
        });
        let overflow = errors.len().saturating_sub(MAX_RECENT_ERRORS);
        if overflow > 0 {
            errors.drain(0..overflow);
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.recent_errors.read().clone()
    }
}
