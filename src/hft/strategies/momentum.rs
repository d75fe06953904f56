// =============================================================================
// Momentum — trade the lag between a spot move and the poly price
// =============================================================================

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::hft::strategies::EvalContext;
use crate::types::{Direction, OrderMode, TradeSignal};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MomentumConfig {
    pub window_sec: f64,
    pub min_spot_move_pct: f64,
    pub max_poly_stale_sec: f64,
    pub max_spread_pct: f64,
    pub min_lag_cents: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            window_sec: 30.0,
            min_spot_move_pct: 0.15,
            max_poly_stale_sec: 5.0,
            max_spread_pct: 2.0,
            min_lag_cents: 0.02,
        }
    }
}

/// Preserved verbatim per spec §9 Open Questions: not a closed-form
/// fair-value model, just the heuristic the source uses.
fn expected_poly_price(spot_move_pct: f64) -> f64 {
    0.50 + spot_move_pct.abs() * 5.0 / 100.0
}

pub fn evaluate_momentum(ctx: &EvalContext, cfg: &MomentumConfig) -> Option<TradeSignal> {
    let spot_move_pct = ctx.spot.move_pct(cfg.window_sec)?;
    if spot_move_pct.abs() < cfg.min_spot_move_pct {
        return None;
    }
    if ctx.poly_age_sec > cfg.max_poly_stale_sec {
        return None;
    }

    let direction = if spot_move_pct > 0.0 { Direction::Up } else { Direction::Down };
    let (book, current_price, token_id) = match direction {
        Direction::Up => (ctx.up_book?, ctx.market.up_price, ctx.market.up_token_id.clone()),
        Direction::Down => (ctx.down_book?, ctx.market.down_price, ctx.market.down_token_id.clone()),
    };

    if book.spread_pct * 100.0 > cfg.max_spread_pct {
        return None;
    }

    let expected = expected_poly_price(spot_move_pct);
    let lag = expected - current_price;
    if lag < cfg.min_lag_cents {
        return None;
    }

    let confidence = (spot_move_pct.abs() / 0.30).min(1.0);
    Some(TradeSignal {
        strategy: "momentum".to_string(),
        asset: ctx.market.asset.clone(),
        direction,
        token_id,
        condition_id: ctx.market.condition_id.clone(),
        price: current_price,
        confidence,
        reason: format!(
            "spot moved {spot_move_pct:.3}% over {:.0}s; expected {expected:.4} vs current {current_price:.4} (lag {lag:.4})",
            cfg.window_sec
        ),
        order_mode: OrderMode::MakerThenTaker,
        features: json!({
            "spot_move_pct": spot_move_pct,
            "expected": expected,
            "lag": lag,
            "spread_pct": book.spread_pct,
        }),
        timestamp: ctx.now_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hft::market_scanner::CryptoMarket;
    use crate::hft::price_buffer::PriceBuffer;
    use crate::types::OrderbookSnapshot;

    fn market() -> CryptoMarket {
        CryptoMarket {
            asset: "BTC".into(),
            market_id: "m1".into(),
            up_token_id: "up".into(),
            down_token_id: "down".into(),
            up_price: 0.51,
            down_price: 0.49,
            condition_id: "c1".into(),
            expires_at: 900_000,
        }
    }

    fn book(spread_pct: f64) -> OrderbookSnapshot {
        OrderbookSnapshot {
            venue: "poly".into(),
            market_id: "m1".into(),
            token_id: "up".into(),
            bids: vec![],
            asks: vec![],
            best_bid: 0.50,
            best_ask: 0.52,
            spread: 0.02,
            spread_pct,
            mid: 0.51,
            bid_depth: 100.0,
            ask_depth: 100.0,
            imbalance: 0.0,
            timestamp: 0,
        }
    }

    #[test]
    fn small_lag_does_not_fire() {
        let spot = PriceBuffer::new();
        spot.push(100.0, 0);
        spot.push(100.25, 30_000); // +0.25% move
        let poly_up = PriceBuffer::new();
        let poly_down = PriceBuffer::new();
        let market = market();
        let up_book = book(0.012);

        let ctx = EvalContext {
            market: &market,
            spot: &spot,
            poly_up: &poly_up,
            poly_down: &poly_down,
            up_book: Some(&up_book),
            down_book: None,
            round_age_sec: 100.0,
            seconds_to_expiry: 400.0,
            poly_age_sec: 2.0,
            now_ms: 30_000,
        };

        assert!(evaluate_momentum(&ctx, &MomentumConfig::default()).is_none());
    }

    #[test]
    fn sufficient_lag_fires_maker_then_taker_at_full_confidence() {
        let spot = PriceBuffer::new();
        spot.push(100.0, 0);
        spot.push(100.50, 30_000); // +0.50% move
        let poly_up = PriceBuffer::new();
        let poly_down = PriceBuffer::new();
        let mut market = market();
        market.up_price = 0.48;
        let up_book = book(0.012);

        let ctx = EvalContext {
            market: &market,
            spot: &spot,
            poly_up: &poly_up,
            poly_down: &poly_down,
            up_book: Some(&up_book),
            down_book: None,
            round_age_sec: 100.0,
            seconds_to_expiry: 400.0,
            poly_age_sec: 2.0,
            now_ms: 30_000,
        };

        let signal = evaluate_momentum(&ctx, &MomentumConfig::default()).unwrap();
        assert_eq!(signal.direction, Direction::Up);
        assert_eq!(signal.order_mode, OrderMode::MakerThenTaker);
        assert!((signal.confidence - 1.0).abs() < 1e-9);
    }
}
