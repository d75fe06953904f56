// =============================================================================
// Market Scanner — discovers the current-round binary markets per asset
// =============================================================================
//
// A "round" is a recurring 15-minute window; each watched asset has two
// binary tokens (up/down) expiring at the round boundary. The scanner polls
// the Feed Manager for the market matching the current round and caches it
// per asset. Which venue market corresponds to "the current round" is a
// venue-specific naming/tagging convention owned by the adapter; this
// scanner only requires that `search_markets(asset, venue)` return a binary
// market (exactly two outcomes) whose `close_time` lands on the current
// round boundary — the shape the up/down strategy family in the pack
// (`other_examples/926c5ca3_..._market_track.rs`) assumes of its own
// per-market tracker.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::feed::manager::FeedManager;
use crate::types::{MarketId, TokenId, VenueId};

const ROUND_DURATION_SEC: i64 = 15 * 60;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundInfo {
    pub slot: i64,
    pub age_sec: f64,
    pub time_left_sec: f64,
}

impl RoundInfo {
    pub fn for_now(now_ms: i64) -> Self {
        let now_sec = now_ms / 1000;
        let slot = now_sec / ROUND_DURATION_SEC;
        let slot_start = slot * ROUND_DURATION_SEC;
        let age_sec = (now_sec - slot_start) as f64;
        Self {
            slot,
            age_sec,
            time_left_sec: ROUND_DURATION_SEC as f64 - age_sec,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CryptoMarket {
    pub asset: String,
    pub market_id: MarketId,
    pub up_token_id: TokenId,
    pub down_token_id: TokenId,
    pub up_price: f64,
    pub down_price: f64,
    pub condition_id: String,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct ScannerConfig {
    pub min_round_age_sec: f64,
    pub min_time_left_sec: f64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_round_age_sec: 5.0,
            min_time_left_sec: 30.0,
        }
    }
}

pub struct MarketScanner {
    feed_manager: Arc<FeedManager>,
    venue: VenueId,
    assets: Vec<String>,
    config: ScannerConfig,
    markets: RwLock<HashMap<String, CryptoMarket>>,
}

impl MarketScanner {
    pub fn new(
        feed_manager: Arc<FeedManager>,
        venue: impl Into<String>,
        assets: Vec<String>,
        config: ScannerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            feed_manager,
            venue: venue.into(),
            assets,
            config,
            markets: RwLock::new(HashMap::new()),
        })
    }

    pub fn round_info(&self, now_ms: i64) -> RoundInfo {
        RoundInfo::for_now(now_ms)
    }

    /// `canTrade()`: ok only when round age and time-left both clear the
    /// configured minimums.
    pub fn can_trade(&self, now_ms: i64) -> bool {
        let round = self.round_info(now_ms);
        round.age_sec >= self.config.min_round_age_sec
            && round.time_left_sec >= self.config.min_time_left_sec
    }

    pub fn market(&self, asset: &str) -> Option<CryptoMarket> {
        self.markets.read().get(asset).cloned()
    }

    pub fn markets(&self) -> Vec<CryptoMarket> {
        self.markets.read().values().cloned().collect()
    }

    /// Re-fetch the current round's binary market per watched asset. Markets
    /// whose `close_time` has already passed are dropped from the cache.
    pub async fn refresh(&self, now_ms: i64) {
        for asset in &self.assets {
            match self.feed_manager.search_markets(asset, Some(&self.venue)).await {
                Ok(candidates) => {
                    if let Some(market) = candidates
                        .into_iter()
                        .filter(|m| m.outcomes.len() == 2)
                        .find(|m| m.close_time.map(|t| t > now_ms).unwrap_or(false))
                    {
                        let up = &market.outcomes[0];
                        let down = &market.outcomes[1];
                        self.markets.write().insert(
                            asset.clone(),
                            CryptoMarket {
                                asset: asset.clone(),
                                market_id: market.id.clone(),
                                up_token_id: up.id.clone(),
                                down_token_id: down.id.clone(),
                                up_price: up.price,
                                down_price: down.price,
                                condition_id: market.id.clone(),
                                expires_at: market.close_time.unwrap_or(now_ms),
                            },
                        );
                    } else {
                        debug!(asset = %asset, "no current-round market found");
                    }
                }
                Err(err) => {
                    warn!(asset = %asset, error = %err, "market scan failed");
                }
            }
        }
    }

    /// Update the cached prices for an asset's market from a live tick,
    /// without round-tripping through the Feed Manager.
    pub fn update_price(&self, asset: &str, token_id: &str, price: f64) {
        if let Some(market) = self.markets.write().get_mut(asset) {
            if market.up_token_id == token_id {
                market.up_price = price;
            } else if market.down_token_id == token_id {
                market.down_price = price;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_info_computes_age_and_time_left_within_window() {
        let round = RoundInfo::for_now(15 * 60 * 1000 + 90_000); // 1:30 into slot 1
        assert_eq!(round.slot, 1);
        assert_eq!(round.age_sec, 90.0);
        assert_eq!(round.time_left_sec, 810.0);
    }

    #[test]
    fn can_trade_requires_both_age_and_time_left_thresholds() {
        let feed_manager = FeedManager::new(std::collections::HashMap::new());
        let scanner = MarketScanner::new(feed_manager, "polymarket", vec!["BTC".into()], ScannerConfig::default());
        // 2s into the round: below min_round_age_sec (5s).
        assert!(!scanner.can_trade(2_000));
        // 10s in: clears both thresholds.
        assert!(scanner.can_trade(10_000));
    }
}
