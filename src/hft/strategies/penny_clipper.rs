// =============================================================================
// Penny Clipper — buy an oscillating cheap side at a discount to its mean
// =============================================================================

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::hft::strategies::{pick_higher_confidence, EvalContext};
use crate::types::{Direction, OrderMode, OrderbookSnapshot, TradeSignal};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PennyClipperConfig {
    pub window_sec: f64,
    pub max_spread: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub min_osc_range: f64,
    pub min_reversals: u32,
    pub reversal_min_step: f64,
    pub entry_discount: f64,
    pub confirm_window_sec: f64,
}

impl Default for PennyClipperConfig {
    fn default() -> Self {
        Self {
            window_sec: 30.0,
            max_spread: 0.02,
            min_price: 0.08,
            max_price: 0.50,
            min_osc_range: 0.03,
            min_reversals: 3,
            reversal_min_step: 0.01,
            entry_discount: 0.01,
            confirm_window_sec: 10.0,
        }
    }
}

fn evaluate_side(
    ctx: &EvalContext,
    cfg: &PennyClipperConfig,
    direction: Direction,
    buf: &crate::hft::price_buffer::PriceBuffer,
    book: Option<&OrderbookSnapshot>,
    current_price: f64,
    token_id: &str,
) -> Option<TradeSignal> {
    if !(cfg.min_price..=cfg.max_price).contains(&current_price) {
        return None;
    }
    let book = book?;
    if book.spread > cfg.max_spread {
        return None;
    }

    let range = buf.range(cfg.window_sec);
    if range < cfg.min_osc_range {
        return None;
    }
    let reversals = buf.reversals(cfg.window_sec, cfg.reversal_min_step);
    if reversals < cfg.min_reversals {
        return None;
    }

    let mean = buf.mean(cfg.window_sec)?;
    let discount = mean - current_price;
    if discount < cfg.entry_discount {
        return None;
    }

    let spot_move = ctx.spot.move_pct(cfg.confirm_window_sec)?;
    let confirms = match direction {
        Direction::Up => spot_move > 0.0,
        Direction::Down => spot_move < 0.0,
    };
    if !confirms {
        return None;
    }

    let confidence = ((reversals as f64 / 5.0) * (range / 0.05)).min(1.0);
    Some(TradeSignal {
        strategy: "penny_clipper".to_string(),
        asset: ctx.market.asset.clone(),
        direction,
        token_id: token_id.to_string(),
        condition_id: ctx.market.condition_id.clone(),
        price: current_price,
        confidence,
        reason: format!(
            "{:?} side oscillating (range {range:.3}, {reversals} reversals), {discount:.3} below {:.0}s mean",
            direction, cfg.window_sec
        ),
        order_mode: OrderMode::Maker,
        features: json!({
            "range": range,
            "reversals": reversals,
            "mean": mean,
            "discount": discount,
            "spot_move_pct": spot_move,
        }),
        timestamp: ctx.now_ms,
    })
}

pub fn evaluate_penny_clipper(ctx: &EvalContext, cfg: &PennyClipperConfig) -> Option<TradeSignal> {
    let up = evaluate_side(ctx, cfg, Direction::Up, ctx.poly_up, ctx.up_book, ctx.market.up_price, &ctx.market.up_token_id);
    let down = evaluate_side(ctx, cfg, Direction::Down, ctx.poly_down, ctx.down_book, ctx.market.down_price, &ctx.market.down_token_id);
    pick_higher_confidence(up, down)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hft::market_scanner::CryptoMarket;
    use crate::hft::price_buffer::PriceBuffer;

    fn market() -> CryptoMarket {
        CryptoMarket {
            asset: "SOL".into(),
            market_id: "m1".into(),
            up_token_id: "up".into(),
            down_token_id: "down".into(),
            up_price: 0.20,
            down_price: 0.80,
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
            best_bid: 0.19,
            best_ask: 0.21,
            spread: 0.02,
            spread_pct: 0.1,
            mid: 0.20,
            bid_depth: 50.0,
            ask_depth: 50.0,
            imbalance: 0.0,
            timestamp: 0,
        }
    }

    fn oscillating_buffer() -> PriceBuffer {
        let buf = PriceBuffer::new();
        // oldest -> newest: clear oscillation with range > 0.03 and >= 3 reversals
        buf.push(0.20, 0);
        buf.push(0.24, 5_000);
        buf.push(0.18, 10_000);
        buf.push(0.23, 15_000);
        buf.push(0.20, 20_000); // newest, current price, discount vs mean
        buf
    }

    #[test]
    fn clips_an_oscillating_cheap_side_confirmed_by_spot() {
        let spot = PriceBuffer::new();
        spot.push(100.0, 10_000);
        spot.push(100.1, 20_000); // confirms Up
        let poly_up = oscillating_buffer();
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
            round_age_sec: 300.0,
            seconds_to_expiry: 600.0,
            poly_age_sec: 1.0,
            now_ms: 20_000,
        };

        let signal = evaluate_penny_clipper(&ctx, &PennyClipperConfig::default()).unwrap();
        assert_eq!(signal.direction, Direction::Up);
        assert_eq!(signal.order_mode, OrderMode::Maker);
    }

    #[test]
    fn unconfirmed_spot_direction_blocks_the_signal() {
        let spot = PriceBuffer::new();
        spot.push(100.0, 10_000);
        spot.push(99.9, 20_000); // moves down, does not confirm an Up clip
        let poly_up = oscillating_buffer();
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
            round_age_sec: 300.0,
            seconds_to_expiry: 600.0,
            poly_age_sec: 1.0,
            now_ms: 20_000,
        };

        assert!(evaluate_penny_clipper(&ctx, &PennyClipperConfig::default()).is_none());
    }
}
