// =============================================================================
// Binance spot adapter — the HFT engine's reference-price venue
// =============================================================================
//
// The crypto asset underlying a prediction market (e.g. "will BTC be above
// $X") needs its own live price, and the engine gets it the same way it
// gets every other price: as a Feed Adapter registered under a venue id
// (`spot_venue`, typically "binance"). Each configured asset maps to one
// degenerate single-outcome `Market` whose only outcome price is the last
// trade price off Binance's public aggTrade stream.
//
// Reconnection follows the adapter policy (doubling backoff from 1s,
// capped at 30s, five attempts) rather than the venue-socket policy, which
// governs authenticated per-user order/fill streams instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

use crate::event_emitter::ListenerId;
use crate::feed::adapter::{AdapterEvents, FeedAdapter};
use crate::types::{Market, Outcome, OrderbookSnapshot, PriceUpdate, VenueId};

const INITIAL_RECONNECT_DELAY_MS: u64 = 1_000;
const RECONNECT_BACKOFF_MULTIPLIER: u32 = 2;
const MAX_RECONNECT_DELAY_MS: u64 = 30_000;
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// One tracked asset's last observed price, kept so `get_market` can
/// answer synchronously between ticks.
struct AssetState {
    last_price: RwLock<Option<f64>>,
    updated_at_ms: AtomicI64,
}

pub struct BinanceSpotAdapter {
    venue: VenueId,
    assets: Vec<String>,
    states: HashMap<String, AssetState>,
    events: AdapterEvents,
    stop: Arc<Notify>,
}

impl BinanceSpotAdapter {
    pub fn new(assets: Vec<String>) -> Arc<Self> {
        let states = assets
            .iter()
            .map(|a| {
                (
                    a.clone(),
                    AssetState {
                        last_price: RwLock::new(None),
                        updated_at_ms: AtomicI64::new(0),
                    },
                )
            })
            .collect();

        Arc::new(Self {
            venue: "binance".to_string(),
            assets,
            states,
            events: AdapterEvents::new(),
            stop: Arc::new(Notify::new()),
        })
    }

    fn market_for(&self, asset: &str) -> Option<Market> {
        let state = self.states.get(asset)?;
        let price = (*state.last_price.read())?;
        let updated_at = state.updated_at_ms.load(Ordering::Relaxed);
        Some(Market {
            venue: self.venue.clone(),
            id: asset.to_string(),
            slug: asset.to_lowercase(),
            question: format!("{asset} spot price"),
            outcomes: vec![Outcome {
                id: asset.to_string(),
                name: asset.to_string(),
                price,
                volume_24h: None,
            }],
            volume_24h: 0.0,
            liquidity: 0.0,
            close_time: None,
            end_time: None,
            resolved: false,
            resolution_value: None,
            tags: None,
            url: String::new(),
            created_at: updated_at,
            updated_at,
        })
    }

    fn record_tick(&self, asset: &str, price: f64) {
        let Some(state) = self.states.get(asset) else {
            return;
        };
        let now = chrono::Utc::now().timestamp_millis();
        let previous_price = state.last_price.write().replace(price);
        state.updated_at_ms.store(now, Ordering::Relaxed);

        self.events.emit_price(&PriceUpdate {
            venue: self.venue.clone(),
            market_id: asset.to_string(),
            outcome_id: asset.to_string(),
            price,
            previous_price,
            timestamp: now,
        });
    }

    async fn stream_one_asset(self: &Arc<Self>, asset: String) {
        let symbol = format!("{asset}USDT").to_lowercase();
        let mut attempt = 0u32;

        loop {
            if attempt >= MAX_RECONNECT_ATTEMPTS {
                error!(asset = %asset, "binance adapter exhausted reconnect attempts");
                return;
            }

            let stop = Arc::clone(&self.stop);
            let run = self.run_stream(&symbol, &asset);
            tokio::select! {
                result = run => {
                    match result {
                        Ok(()) => {
                            info!(asset = %asset, "binance stream ended cleanly");
                            return;
                        }
                        Err(err) => {
                            warn!(asset = %asset, error = %err, attempt, "binance stream error, reconnecting");
                        }
                    }
                }
                _ = stop.notified() => {
                    info!(asset = %asset, "binance adapter stop requested");
                    return;
                }
            }

            let delay_ms = (INITIAL_RECONNECT_DELAY_MS
                * RECONNECT_BACKOFF_MULTIPLIER.pow(attempt))
            .min(MAX_RECONNECT_DELAY_MS);
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            attempt += 1;
        }
    }

    async fn run_stream(&self, symbol: &str, asset: &str) -> Result<()> {
        let url = format!("wss://stream.binance.com:9443/ws/{symbol}@aggTrade");
        info!(url = %url, asset = %asset, "connecting to binance spot stream");

        let (ws_stream, _response) = connect_async(&url)
            .await
            .context("failed to connect to binance aggTrade stream")?;
        let (_write, mut read) = ws_stream.split();

        loop {
            match read.next().await {
                Some(Ok(tokio_tungstenite::tungstenite::Message::Text(text))) => {
                    match parse_agg_trade_price(&text) {
                        Ok(price) => self.record_tick(asset, price),
                        Err(err) => warn!(asset = %asset, error = %err, "failed to parse aggTrade message"),
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.into()),
                None => return Ok(()),
            }
        }
    }
}

fn parse_agg_trade_price(text: &str) -> Result<f64> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse aggTrade JSON")?;
    root["p"]
        .as_str()
        .context("missing field p")?
        .parse::<f64>()
        .context("failed to parse price")
}

#[async_trait]
impl FeedAdapter for BinanceSpotAdapter {
    fn venue(&self) -> VenueId {
        self.venue.clone()
    }

    async fn start(&self) -> anyhow::Result<()> {
        // No-op here: spawning the per-asset streams needs an `Arc<Self>`
        // to clone into each task, which `&self` can't produce. The real
        // spawn happens in `start_concrete`, called by main.rs on the
        // concrete `Arc<BinanceSpotAdapter>` before it's erased into
        // `Arc<dyn FeedAdapter>` and handed to the Feed Manager.
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stop.notify_waiters();
        Ok(())
    }

    async fn search_markets(&self, query: &str) -> anyhow::Result<Vec<Market>> {
        let query = query.to_uppercase();
        Ok(self
            .assets
            .iter()
            .filter(|a| a.contains(&query) || query.is_empty())
            .filter_map(|a| self.market_for(a))
            .collect())
    }

    async fn get_market(&self, id: &str) -> anyhow::Result<Option<Market>> {
        Ok(self.market_for(id))
    }

    async fn get_orderbook(&self, _id: &str) -> anyhow::Result<Option<OrderbookSnapshot>> {
        Ok(None)
    }

    fn on_price(&self, listener: Box<dyn Fn(&PriceUpdate) + Send + Sync>) -> ListenerId {
        self.events.on_price(listener)
    }

    fn off_price(&self, id: ListenerId) {
        self.events.off_price(id);
    }

    fn on_orderbook(
        &self,
        listener: Box<dyn Fn(&OrderbookSnapshot) + Send + Sync>,
    ) -> ListenerId {
        self.events.on_orderbook(listener)
    }

    fn off_orderbook(&self, id: ListenerId) {
        self.events.off_orderbook(id);
    }
}

impl BinanceSpotAdapter {
    /// Spawn one reconnecting stream task per configured asset. Must be
    /// called on the concrete `Arc<BinanceSpotAdapter>` before it is
    /// erased into `Arc<dyn FeedAdapter>`, since each task clones the
    /// `Arc` to call back into `record_tick`.
    pub fn start_concrete(self: &Arc<Self>) {
        for asset in self.assets.clone() {
            let adapter = Arc::clone(self);
            tokio::spawn(async move {
                adapter.stream_one_asset(asset).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_agg_trade_price() {
        let msg = r#"{"e":"aggTrade","s":"BTCUSDT","p":"67123.45","q":"0.01","m":false}"#;
        assert_eq!(parse_agg_trade_price(msg).unwrap(), 67123.45);
    }

    #[tokio::test]
    async fn get_market_is_none_before_first_tick() {
        let adapter = BinanceSpotAdapter::new(vec!["BTC".to_string()]);
        assert!(adapter.get_market("BTC").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_tick_populates_market_and_emits_price() {
        let adapter = BinanceSpotAdapter::new(vec!["BTC".to_string()]);
        adapter.record_tick("BTC", 67000.0);
        let market = adapter.get_market("BTC").await.unwrap().unwrap();
        assert_eq!(market.first_price(), Some(67000.0));
    }
}
