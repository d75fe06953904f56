// =============================================================================
// Core data model — shared types used across the whole engine
// =============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

/// Venue identifier (e.g. "polymarket", "kalshi", "manifold").
pub type VenueId = String;

/// Market identifier, venue-specific.
pub type MarketId = String;

/// Outcome/token identifier within a market.
pub type TokenId = String;

/// One outcome of a market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub id: TokenId,
    pub name: String,
    /// Current price in [0, 1].
    pub price: f64,
    #[serde(default)]
    pub volume_24h: Option<f64>,
}

/// One prediction-market entity, as normalized by a Feed Adapter.
///
/// Invariant: outcome prices sum to ~1 for binary markets. No hard
/// invariant is enforced for multi-outcome markets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub venue: VenueId,
    pub id: MarketId,
    pub slug: String,
    pub question: String,
    pub outcomes: Vec<Outcome>,
    pub volume_24h: f64,
    pub liquidity: f64,
    #[serde(default)]
    pub close_time: Option<i64>,
    #[serde(default)]
    pub end_time: Option<i64>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub resolution_value: Option<f64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    pub url: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Market {
    /// First outcome's price — the shorthand alert checks and
    /// `FeedManager::get_price` use.
    pub fn first_price(&self) -> Option<f64> {
        self.outcomes.first().map(|o| o.price)
    }
}

/// Immutable price tick, produced by a Feed Adapter and consumed by Signal
/// Bus listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub venue: VenueId,
    pub market_id: MarketId,
    pub outcome_id: TokenId,
    pub price: f64,
    #[serde(default)]
    pub previous_price: Option<f64>,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

/// A single price level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

/// Immutable orderbook value. Invariant: `best_bid <= best_ask` when both
/// sides are non-empty; `spread >= 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub venue: VenueId,
    pub market_id: MarketId,
    pub token_id: TokenId,
    /// Descending by price.
    pub bids: Vec<PriceLevel>,
    /// Ascending by price.
    pub asks: Vec<PriceLevel>,
    pub best_bid: f64,
    pub best_ask: f64,
    pub spread: f64,
    pub spread_pct: f64,
    pub mid: f64,
    pub bid_depth: f64,
    pub ask_depth: f64,
    /// Depth-weighted order-book imbalance in [-1, 1].
    pub imbalance: f64,
    pub timestamp: i64,
}

impl OrderbookSnapshot {
    /// Build a snapshot from raw levels, deriving best bid/ask, spread,
    /// mid, depth, and imbalance, the way `market_data::orderbook` derives
    /// them from raw depth messages.
    pub fn from_levels(
        venue: impl Into<String>,
        market_id: impl Into<String>,
        token_id: impl Into<String>,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        timestamp: i64,
    ) -> Self {
        let best_bid = bids.first().map(|l| l.price).unwrap_or(0.0);
        let best_ask = asks.first().map(|l| l.price).unwrap_or(0.0);
        let mid = if best_bid > 0.0 && best_ask > 0.0 {
            (best_bid + best_ask) / 2.0
        } else {
            0.0
        };
        let spread = (best_ask - best_bid).max(0.0);
        let spread_pct = if mid > 0.0 { spread / mid } else { 0.0 };
        let bid_depth: f64 = bids.iter().map(|l| l.size).sum();
        let ask_depth: f64 = asks.iter().map(|l| l.size).sum();
        let total_depth = bid_depth + ask_depth;
        let imbalance = if total_depth > 0.0 {
            (bid_depth - ask_depth) / total_depth
        } else {
            0.0
        };

        Self {
            venue: venue.into(),
            market_id: market_id.into(),
            token_id: token_id.into(),
            bids,
            asks,
            best_bid,
            best_ask,
            spread,
            spread_pct,
            mid,
            bid_depth,
            ask_depth,
            imbalance,
            timestamp,
        }
    }

    /// Degenerate single-level book synthesized by the Feed Manager when an
    /// adapter does not implement `get_orderbook`.
    pub fn synthesize(
        venue: impl Into<String>,
        market_id: impl Into<String>,
        token_id: impl Into<String>,
        price: f64,
        size: f64,
        timestamp: i64,
    ) -> Self {
        let size = size.max(1.0);
        Self::from_levels(
            venue,
            market_id,
            token_id,
            vec![PriceLevel { price, size }],
            vec![PriceLevel { price, size }],
            timestamp,
        )
    }
}

/// Long/short direction for an HFT position or signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }
}

/// Order side as understood by the Execution Interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// How an order should be routed. See spec §4.5.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderMode {
    Maker,
    Taker,
    Fok,
    MakerThenTaker,
}

impl fmt::Display for OrderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Maker => write!(f, "maker"),
            Self::Taker => write!(f, "taker"),
            Self::Fok => write!(f, "fok"),
            Self::MakerThenTaker => write!(f, "maker_then_taker"),
        }
    }
}

/// Why a position was closed. Priority order for `check_exits` is:
/// ForceExit > StopLoss > TakeProfit > Ratchet > TrailingStop >
/// StaleProfit > StagnantProfit > DepthCollapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Ratchet,
    TrailingStop,
    StaleProfit,
    StagnantProfit,
    DepthCollapse,
    ForceExit,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TakeProfit => "take_profit",
            Self::StopLoss => "stop_loss",
            Self::Ratchet => "ratchet",
            Self::TrailingStop => "trailing_stop",
            Self::StaleProfit => "stale_profit",
            Self::StagnantProfit => "stagnant_profit",
            Self::DepthCollapse => "depth_collapse",
            Self::ForceExit => "force_exit",
        };
        write!(f, "{s}")
    }
}

/// Immutable trade decision produced by a strategy evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub strategy: String,
    pub asset: String,
    pub direction: Direction,
    pub token_id: TokenId,
    pub condition_id: String,
    pub price: f64,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub reason: String,
    pub order_mode: OrderMode,
    /// Captured evaluation context, for the decision audit trail.
    pub features: serde_json::Value,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orderbook_imbalance_favors_bid_heavy_book() {
        let book = OrderbookSnapshot::from_levels(
            "polymarket",
            "m1",
            "t1",
            vec![PriceLevel { price: 0.50, size: 300.0 }],
            vec![PriceLevel { price: 0.52, size: 100.0 }],
            0,
        );
        assert!(book.imbalance > 0.0);
        assert!((book.spread - 0.02).abs() < 1e-9);
        assert!(book.best_bid <= book.best_ask);
    }

    #[test]
    fn synthesized_book_has_equal_bid_ask_price() {
        let book = OrderbookSnapshot::synthesize("kalshi", "m2", "t2", 0.3, 0.5, 1000);
        assert_eq!(book.best_bid, book.best_ask);
        assert_eq!(book.bid_depth, 1.0); // max(1, 0.5)
        assert_eq!(book.imbalance, 0.0);
    }

    #[test]
    fn direction_opposite_round_trips() {
        assert_eq!(Direction::Up.opposite().opposite(), Direction::Up);
    }
}
