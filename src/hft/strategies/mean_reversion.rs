// =============================================================================
// Mean Reversion — fade an over-extended cheap/expensive side back toward 0.5
// =============================================================================

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::hft::strategies::{pick_higher_confidence, EvalContext};
use crate::types::{Direction, OrderMode, OrderbookSnapshot, TradeSignal};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MeanReversionConfig {
    pub spot_window_sec: f64,
    pub min_round_age_sec: f64,
    pub max_spot_move_pct: f64,
    pub cheap_threshold: f64,
    pub expensive_threshold: f64,
    pub min_obi: f64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            spot_window_sec: 300.0,
            min_round_age_sec: 120.0,
            max_spot_move_pct: 0.08,
            cheap_threshold: 0.30,
            expensive_threshold: 0.72,
            min_obi: -0.1,
        }
    }
}

fn evaluate_side(
    ctx: &EvalContext,
    cfg: &MeanReversionConfig,
    direction: Direction,
    book: Option<&OrderbookSnapshot>,
    current_price: f64,
    opposing_price: f64,
    token_id: &str,
) -> Option<TradeSignal> {
    if current_price > cfg.cheap_threshold {
        return None;
    }
    if opposing_price < cfg.expensive_threshold {
        return None;
    }
    let book = book?;
    if book.imbalance < cfg.min_obi {
        return None;
    }

    let confidence = ((1.0 - current_price) * 1.5).min(1.0);
    Some(TradeSignal {
        strategy: "mean_reversion".to_string(),
        asset: ctx.market.asset.clone(),
        direction,
        token_id: token_id.to_string(),
        condition_id: ctx.market.condition_id.clone(),
        price: current_price,
        confidence,
        reason: format!(
            "{:?} side cheap at {current_price:.4} (threshold {:.2}), opposing side expensive at {opposing_price:.4} (threshold {:.2}), obi {:.3}",
            direction, cfg.cheap_threshold, cfg.expensive_threshold, book.imbalance
        ),
        order_mode: OrderMode::Maker,
        features: json!({
            "obi": book.imbalance,
            "cheap_threshold": cfg.cheap_threshold,
            "expensive_threshold": cfg.expensive_threshold,
            "opposing_price": opposing_price,
        }),
        timestamp: ctx.now_ms,
    })
}

pub fn evaluate_mean_reversion(ctx: &EvalContext, cfg: &MeanReversionConfig) -> Option<TradeSignal> {
    let spot_move = ctx.spot.move_pct(cfg.spot_window_sec)?;
    if spot_move.abs() > cfg.max_spot_move_pct {
        return None;
    }
    if ctx.round_age_sec < cfg.min_round_age_sec {
        return None;
    }

    let up = evaluate_side(
        ctx,
        cfg,
        Direction::Up,
        ctx.up_book,
        ctx.market.up_price,
        ctx.market.down_price,
        &ctx.market.up_token_id,
    );
    let down = evaluate_side(
        ctx,
        cfg,
        Direction::Down,
        ctx.down_book,
        ctx.market.down_price,
        ctx.market.up_price,
        &ctx.market.down_token_id,
    );
    pick_higher_confidence(up, down)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hft::market_scanner::CryptoMarket;
    use crate::hft::price_buffer::PriceBuffer;

    fn market() -> CryptoMarket {
        CryptoMarket {
            asset: "ETH".into(),
            market_id: "m1".into(),
            up_token_id: "up".into(),
            down_token_id: "down".into(),
            up_price: 0.22,
            down_price: 0.78,
            condition_id: "c1".into(),
            expires_at: 900_000,
        }
    }

    fn book(imbalance: f64) -> OrderbookSnapshot {
        OrderbookSnapshot {
            venue: "poly".into(),
            market_id: "m1".into(),
            token_id: "up".into(),
            bids: vec![],
            asks: vec![],
            best_bid: 0.21,
            best_ask: 0.23,
            spread: 0.02,
            spread_pct: 0.01,
            mid: 0.22,
            bid_depth: 10.0,
            ask_depth: 10.0,
            imbalance,
            timestamp: 0,
        }
    }

    #[test]
    fn buys_the_cheap_side_when_round_is_old_enough_and_spot_is_calm() {
        let spot = PriceBuffer::new();
        spot.push(100.0, 0);
        spot.push(100.02, 300_000); // well under 0.08% move
        let poly_up = PriceBuffer::new();
        let poly_down = PriceBuffer::new();
        let market = market();
        let up_book = book(0.0);

        let ctx = EvalContext {
            market: &market,
            spot: &spot,
            poly_up: &poly_up,
            poly_down: &poly_down,
            up_book: Some(&up_book),
            down_book: None,
            round_age_sec: 200.0,
            seconds_to_expiry: 700.0,
            poly_age_sec: 1.0,
            now_ms: 300_000,
        };

        let signal = evaluate_mean_reversion(&ctx, &MeanReversionConfig::default()).unwrap();
        assert_eq!(signal.direction, Direction::Up);
        assert_eq!(signal.order_mode, OrderMode::Maker);
    }

    #[test]
    fn skips_when_round_is_too_young() {
        let spot = PriceBuffer::new();
        spot.push(100.0, 0);
        spot.push(100.02, 300_000);
        let poly_up = PriceBuffer::new();
        let poly_down = PriceBuffer::new();
        let market = market();
        let up_book = book(0.0);

        let ctx = EvalContext {
            market: &market,
            spot: &spot,
            poly_up: &poly_up,
            poly_down: &poly_down,
            up_book: Some(&up_book),
            down_book: None,
            round_age_sec: 30.0,
            seconds_to_expiry: 870.0,
            poly_age_sec: 1.0,
            now_ms: 300_000,
        };

        assert!(evaluate_mean_reversion(&ctx, &MeanReversionConfig::default()).is_none());
    }

    #[test]
    fn obi_fighting_order_flow_blocks_the_signal() {
        let spot = PriceBuffer::new();
        spot.push(100.0, 0);
        spot.push(100.02, 300_000);
        let poly_up = PriceBuffer::new();
        let poly_down = PriceBuffer::new();
        let market = market();
        let up_book = book(-0.5); // well below min_obi

        let ctx = EvalContext {
            market: &market,
            spot: &spot,
            poly_up: &poly_up,
            poly_down: &poly_down,
            up_book: Some(&up_book),
            down_book: None,
            round_age_sec: 200.0,
            seconds_to_expiry: 700.0,
            poly_age_sec: 1.0,
            now_ms: 300_000,
        };

        assert!(evaluate_mean_reversion(&ctx, &MeanReversionConfig::default()).is_none());
    }

    #[test]
    fn skips_cheap_side_when_opposing_side_is_not_expensive_enough() {
        let spot = PriceBuffer::new();
        spot.push(100.0, 0);
        spot.push(100.02, 300_000);
        let poly_up = PriceBuffer::new();
        let poly_down = PriceBuffer::new();
        // Up is cheap (0.22) but down is only 0.60, below the 0.72 expensive_threshold,
        // so this isn't a genuinely over-extended two-sided mispricing.
        let mut market = market();
        market.up_price = 0.22;
        market.down_price = 0.60;
        let up_book = book(0.0);

        let ctx = EvalContext {
            market: &market,
            spot: &spot,
            poly_up: &poly_up,
            poly_down: &poly_down,
            up_book: Some(&up_book),
            down_book: None,
            round_age_sec: 200.0,
            seconds_to_expiry: 700.0,
            poly_age_sec: 1.0,
            now_ms: 300_000,
        };

        assert!(evaluate_mean_reversion(&ctx, &MeanReversionConfig::default()).is_none());
    }
}
