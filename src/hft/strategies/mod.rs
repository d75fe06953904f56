// =============================================================================
// Strategy Evaluators — four pure functions producing trade signals
// =============================================================================
//
// Every evaluator takes an `EvalContext` (a read-only snapshot of buffers,
// order books, and round state) and returns `Option<TradeSignal>`. None of
// them mutate anything; `evaluate_all` is the only place that picks a
// winner, by highest confidence, per spec §4.5.3 and the "HFT signal
// selection" testable property.

mod expiry_fade;
mod mean_reversion;
mod momentum;
mod penny_clipper;

pub use expiry_fade::{evaluate_expiry_fade, ExpiryFadeConfig};
pub use mean_reversion::{evaluate_mean_reversion, MeanReversionConfig};
pub use momentum::{evaluate_momentum, MomentumConfig};
pub use penny_clipper::{evaluate_penny_clipper, PennyClipperConfig};

use serde::{Deserialize, Serialize};

use crate::hft::market_scanner::CryptoMarket;
use crate::hft::price_buffer::PriceBuffer;
use crate::types::{OrderbookSnapshot, TradeSignal};

/// Read-only snapshot an evaluator needs. Built fresh by the engine on every
/// spot tick; never shared mutably with strategy code.
pub struct EvalContext<'a> {
    pub market: &'a CryptoMarket,
    pub spot: &'a PriceBuffer,
    pub poly_up: &'a PriceBuffer,
    pub poly_down: &'a PriceBuffer,
    pub up_book: Option<&'a OrderbookSnapshot>,
    pub down_book: Option<&'a OrderbookSnapshot>,
    pub round_age_sec: f64,
    pub seconds_to_expiry: f64,
    /// Freshness, in seconds, of the most recently observed poly price for
    /// this asset (either side).
    pub poly_age_sec: f64,
    pub now_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfigs {
    pub momentum: MomentumConfig,
    pub mean_reversion: MeanReversionConfig,
    pub penny_clipper: PennyClipperConfig,
    pub expiry_fade: ExpiryFadeConfig,
}

impl Default for StrategyConfigs {
    fn default() -> Self {
        Self {
            momentum: MomentumConfig::default(),
            mean_reversion: MeanReversionConfig::default(),
            penny_clipper: PennyClipperConfig::default(),
            expiry_fade: ExpiryFadeConfig::default(),
        }
    }
}

/// Evaluate every strategy and return the signal with the highest
/// `confidence`, or `None` if none fired.
pub fn evaluate_all(ctx: &EvalContext, configs: &StrategyConfigs) -> Option<TradeSignal> {
    let candidates = [
        evaluate_momentum(ctx, &configs.momentum),
        evaluate_mean_reversion(ctx, &configs.mean_reversion),
        evaluate_penny_clipper(ctx, &configs.penny_clipper),
        evaluate_expiry_fade(ctx, &configs.expiry_fade),
    ];
    candidates
        .into_iter()
        .flatten()
        .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal))
}

/// Shared by the two evaluators (mean reversion, penny clipper) that
/// evaluate each side independently and keep the higher-confidence result —
/// the per-side primitive the spec's Open Questions section calls for.
pub(crate) fn pick_higher_confidence(
    a: Option<TradeSignal>,
    b: Option<TradeSignal>,
) -> Option<TradeSignal> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if a.confidence >= b.confidence { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, OrderMode};

    fn signal(strategy: &str, confidence: f64) -> TradeSignal {
        TradeSignal {
            strategy: strategy.to_string(),
            asset: "BTC".into(),
            direction: Direction::Up,
            token_id: "t".into(),
            condition_id: "c".into(),
            price: 0.5,
            confidence,
            reason: String::new(),
            order_mode: OrderMode::Taker,
            features: serde_json::json!({}),
            timestamp: 0,
        }
    }

    #[test]
    fn evaluate_all_prefers_highest_confidence_among_candidates() {
        let candidates = [Some(signal("a", 0.4)), None, Some(signal("c", 0.9)), Some(signal("d", 0.2))];
        let winner = candidates
            .into_iter()
            .flatten()
            .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap())
            .unwrap();
        assert_eq!(winner.strategy, "c");
    }

    #[test]
    fn pick_higher_confidence_prefers_the_larger_value() {
        let picked = pick_higher_confidence(Some(signal("up", 0.3)), Some(signal("down", 0.6)));
        assert_eq!(picked.unwrap().strategy, "down");
    }
}
