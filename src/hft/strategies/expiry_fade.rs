// =============================================================================
// Expiry Fade — buy the cheaper side when it has skewed far from a coin flip
// =============================================================================

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::hft::strategies::EvalContext;
use crate::types::{Direction, OrderMode, TradeSignal};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExpiryFadeConfig {
    pub min_sec_left: f64,
    pub window_sec: f64,
    pub spot_window_sec: f64,
    pub max_recent_spot_move_pct: f64,
    pub max_spread_pct: f64,
    pub min_skew_from_mid: f64,
}

impl Default for ExpiryFadeConfig {
    fn default() -> Self {
        Self {
            min_sec_left: 60.0,
            window_sec: 300.0,
            spot_window_sec: 30.0,
            max_recent_spot_move_pct: 0.06,
            max_spread_pct: 2.5,
            min_skew_from_mid: 0.15,
        }
    }
}

pub fn evaluate_expiry_fade(ctx: &EvalContext, cfg: &ExpiryFadeConfig) -> Option<TradeSignal> {
    if ctx.seconds_to_expiry < cfg.min_sec_left || ctx.seconds_to_expiry > cfg.window_sec {
        return None;
    }
    let spot_move = ctx.spot.move_pct(cfg.spot_window_sec)?;
    if spot_move.abs() > cfg.max_recent_spot_move_pct {
        return None;
    }

    let (direction, price, token_id, book) = if ctx.market.up_price <= ctx.market.down_price {
        (Direction::Up, ctx.market.up_price, &ctx.market.up_token_id, ctx.up_book)
    } else {
        (Direction::Down, ctx.market.down_price, &ctx.market.down_token_id, ctx.down_book)
    };
    let book = book?;
    if book.spread_pct * 100.0 > cfg.max_spread_pct {
        return None;
    }

    let skew = 0.50 - price;
    if skew < cfg.min_skew_from_mid {
        return None;
    }

    let confidence = (skew * 3.0).min(1.0);
    Some(TradeSignal {
        strategy: "expiry_fade".to_string(),
        asset: ctx.market.asset.clone(),
        direction,
        token_id: token_id.clone(),
        condition_id: ctx.market.condition_id.clone(),
        price,
        confidence,
        reason: format!(
            "{:?} side cheapest at {price:.4}, skew {skew:.3} from mid with {:.0}s to expiry",
            direction, ctx.seconds_to_expiry
        ),
        order_mode: OrderMode::Taker,
        features: json!({
            "skew": skew,
            "spread_pct": book.spread_pct,
            "seconds_to_expiry": ctx.seconds_to_expiry,
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
            up_price: 0.30,
            down_price: 0.70,
            condition_id: "c1".into(),
            expires_at: 900_000,
        }
    }

    fn book() -> OrderbookSnapshot {
        OrderbookSnapshot {
            venue: "poly".into(),
            market_id: "m1".into(),
            token_id: "up".into(),
            bids: vec![],
            asks: vec![],
            best_bid: 0.29,
            best_ask: 0.31,
            spread: 0.02,
            spread_pct: 0.02,
            mid: 0.30,
            bid_depth: 20.0,
            ask_depth: 20.0,
            imbalance: 0.0,
            timestamp: 0,
        }
    }

    #[test]
    fn buys_the_cheaper_side_when_skewed_near_expiry() {
        let spot = PriceBuffer::new();
        spot.push(100.0, 0);
        spot.push(100.01, 30_000); // tiny move, under max_recent_spot_move_pct
        let poly_up = PriceBuffer::new();
        let poly_down = PriceBuffer::new();
        let market = market();
        let up_book = book();

        let ctx = EvalContext {
            market: &market,
            spot: &spot,
            poly_up: &poly_up,
            poly_down: &poly_down,
            up_book: Some(&up_book),
            down_book: None,
            round_age_sec: 750.0,
            seconds_to_expiry: 120.0,
            poly_age_sec: 1.0,
            now_ms: 30_000,
        };

        let signal = evaluate_expiry_fade(&ctx, &ExpiryFadeConfig::default()).unwrap();
        assert_eq!(signal.direction, Direction::Up);
        assert_eq!(signal.order_mode, OrderMode::Taker);
    }

    #[test]
    fn too_far_from_expiry_window_does_not_fire() {
        let spot = PriceBuffer::new();
        spot.push(100.0, 0);
        spot.push(100.01, 30_000);
        let poly_up = PriceBuffer::new();
        let poly_down = PriceBuffer::new();
        let market = market();
        let up_book = book();

        let ctx = EvalContext {
            market: &market,
            spot: &spot,
            poly_up: &poly_up,
            poly_down: &poly_down,
            up_book: Some(&up_book),
            down_book: None,
            round_age_sec: 100.0,
            seconds_to_expiry: 500.0,
            poly_age_sec: 1.0,
            now_ms: 30_000,
        };

        assert!(evaluate_expiry_fade(&ctx, &ExpiryFadeConfig::default()).is_none());
    }
}
