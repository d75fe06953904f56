// =============================================================================
// Position Manager — open/closed position bookkeeping and the exit chain
// =============================================================================
//
// `check_exits` evaluates the priority-ordered chain from spec §4.5.4, in
// order, stopping at the first match: ForceExit > StopLoss > TakeProfit >
// Ratchet > TrailingStop > StaleProfit > StagnantProfit > DepthCollapse.
// Positions are mutated only by `open`, `tick`, and `close`, per the
// shared-resource policy the engine relies on.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Direction, ExitReason, OrderMode, OrderbookSnapshot, TokenId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionManagerConfig {
    pub force_exit_sec: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub maker_exits_for_tp_only: bool,
    pub ratchet_confirm_ticks: u32,
    pub ratchet_confirm_tolerance_pct: f64,
    pub trailing_late_pct: f64,
    pub trailing_mid_pct: f64,
    pub trailing_wide_pct: f64,
    /// Seconds-to-expiry bucket boundaries, late/mid cutoffs; beyond the mid
    /// cutoff the wide band applies. Not given explicit numbers by the
    /// contract; chosen to line up with the four strategies' own windows.
    pub trailing_late_cutoff_sec: f64,
    pub trailing_mid_cutoff_sec: f64,
    pub stale_profit_pct: f64,
    pub stale_profit_bid_unchanged_sec: f64,
    pub stagnant_profit_pct: f64,
    pub stagnant_duration_sec: f64,
    pub depth_collapse_threshold_pct: f64,
    pub sell_cooldown_ms: i64,
    pub max_concurrent_positions: usize,
}

impl Default for PositionManagerConfig {
    fn default() -> Self {
        Self {
            force_exit_sec: 30.0,
            stop_loss_pct: 12.0,
            take_profit_pct: 15.0,
            maker_exits_for_tp_only: true,
            ratchet_confirm_ticks: 3,
            ratchet_confirm_tolerance_pct: 0.5,
            trailing_late_pct: 7.0,
            trailing_mid_pct: 10.0,
            trailing_wide_pct: 15.0,
            trailing_late_cutoff_sec: 120.0,
            trailing_mid_cutoff_sec: 300.0,
            stale_profit_pct: 9.0,
            stale_profit_bid_unchanged_sec: 7.0,
            stagnant_profit_pct: 3.0,
            stagnant_duration_sec: 13.0,
            depth_collapse_threshold_pct: 60.0,
            sell_cooldown_ms: 2_000,
            max_concurrent_positions: 4,
        }
    }
}

impl PositionManagerConfig {
    fn trailing_band_pct(&self, seconds_to_expiry: f64) -> f64 {
        if seconds_to_expiry <= self.trailing_late_cutoff_sec {
            self.trailing_late_pct
        } else if seconds_to_expiry <= self.trailing_mid_cutoff_sec {
            self.trailing_mid_pct
        } else {
            self.trailing_wide_pct
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenPosition {
    pub id: String,
    pub strategy: String,
    pub asset: String,
    pub direction: Direction,
    pub token_id: TokenId,
    pub condition_id: String,
    pub entry_price: f64,
    pub shares: f64,
    pub expires_at_ms: i64,
    pub opened_at_ms: i64,
    pub current_price: f64,
    pub last_tick_at_ms: i64,
    pub peak_pnl_pct: f64,
    pub ratchet_confirm_count: u32,
    pub ratchet_locked_pnl_pct: Option<f64>,
    pub last_bid: f64,
    pub last_bid_changed_at_ms: i64,
    pub stagnant_since_ms: Option<i64>,
    pub peak_bid_depth: f64,
    pub current_bid_depth: f64,
    pub force_exit: bool,
}

impl OpenPosition {
    pub fn pnl_pct(&self, price: f64) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price * 100.0
    }

    fn seconds_to_expiry(&self, now_ms: i64) -> f64 {
        (self.expires_at_ms - now_ms).max(0) as f64 / 1000.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClosedPosition {
    pub asset: String,
    pub open: OpenPosition,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub used_maker: bool,
    pub closed_at_ms: i64,
    pub pnl_pct: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PositionStats {
    pub open_count: usize,
    pub closed_count: usize,
    pub wins: usize,
    pub losses: usize,
    pub total_pnl_pct: f64,
    pub win_rate: f64,
}

pub struct PositionManager {
    config: PositionManagerConfig,
    open: RwLock<HashMap<String, OpenPosition>>,
    closed: RwLock<Vec<ClosedPosition>>,
    last_sell_at_ms: RwLock<HashMap<String, i64>>,
}

impl PositionManager {
    pub fn new(config: PositionManagerConfig) -> Self {
        Self {
            config,
            open: RwLock::new(HashMap::new()),
            closed: RwLock::new(Vec::new()),
            last_sell_at_ms: RwLock::new(HashMap::new()),
        }
    }

    /// Enforces per-asset uniqueness, the portfolio concurrency cap, and the
    /// sell cooldown after the asset's last close.
    pub fn can_open(&self, asset: &str, now_ms: i64) -> bool {
        let open = self.open.read();
        if open.len() >= self.config.max_concurrent_positions {
            return false;
        }
        if open.values().any(|p| p.asset == asset) {
            return false;
        }
        drop(open);
        match self.last_sell_at_ms.read().get(asset) {
            Some(&last) => now_ms - last >= self.config.sell_cooldown_ms,
            None => true,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &self,
        asset: impl Into<String>,
        direction: Direction,
        token_id: impl Into<String>,
        condition_id: impl Into<String>,
        strategy: impl Into<String>,
        entry_price: f64,
        shares: f64,
        expires_at_ms: i64,
        now_ms: i64,
    ) -> OpenPosition {
        let position = OpenPosition {
            id: Uuid::new_v4().to_string(),
            strategy: strategy.into(),
            asset: asset.into(),
            direction,
            token_id: token_id.into(),
            condition_id: condition_id.into(),
            entry_price,
            shares,
            expires_at_ms,
            opened_at_ms: now_ms,
            current_price: entry_price,
            last_tick_at_ms: now_ms,
            peak_pnl_pct: 0.0,
            ratchet_confirm_count: 0,
            ratchet_locked_pnl_pct: None,
            last_bid: 0.0,
            last_bid_changed_at_ms: now_ms,
            stagnant_since_ms: None,
            peak_bid_depth: 0.0,
            current_bid_depth: 0.0,
            force_exit: false,
        };
        self.open.write().insert(position.id.clone(), position.clone());
        position
    }

    /// Advance a position's tracked state with a fresh price/book
    /// observation. Must run before `check_exits` reads the updated state.
    pub fn tick(&self, id: &str, price: f64, book: Option<&OrderbookSnapshot>, now_ms: i64) {
        let mut open = self.open.write();
        let Some(position) = open.get_mut(id) else { return };

        position.current_price = price;
        position.last_tick_at_ms = now_ms;

        let pnl = position.pnl_pct(price);
        if pnl > position.peak_pnl_pct {
            position.peak_pnl_pct = pnl;
            position.ratchet_confirm_count = 0;
        }

        let cfg = &self.config;
        if position.ratchet_locked_pnl_pct.is_none() && position.peak_pnl_pct > 0.0 {
            if (position.peak_pnl_pct - pnl).abs() <= cfg.ratchet_confirm_tolerance_pct {
                position.ratchet_confirm_count += 1;
                if position.ratchet_confirm_count >= cfg.ratchet_confirm_ticks {
                    position.ratchet_locked_pnl_pct = Some(position.peak_pnl_pct);
                }
            } else {
                position.ratchet_confirm_count = 0;
            }
        }

        if pnl >= cfg.stagnant_profit_pct {
            if position.stagnant_since_ms.is_none() {
                position.stagnant_since_ms = Some(now_ms);
            }
        } else {
            position.stagnant_since_ms = None;
        }

        if let Some(book) = book {
            if (book.best_bid - position.last_bid).abs() > f64::EPSILON {
                position.last_bid = book.best_bid;
                position.last_bid_changed_at_ms = now_ms;
            }
            position.current_bid_depth = book.bid_depth;
            if book.bid_depth > position.peak_bid_depth {
                position.peak_bid_depth = book.bid_depth;
            }
        }
    }

    pub fn request_force_exit(&self, id: &str) {
        if let Some(position) = self.open.write().get_mut(id) {
            position.force_exit = true;
        }
    }

    /// Evaluate the priority-ordered exit chain. Returns the reason and the
    /// order mode that exit must be routed through — stop loss is always a
    /// FOK taker per spec, force exit and the remaining defensive exits are
    /// plain taker, and take profit honors `maker_exits_for_tp_only`.
    pub fn check_exits(&self, id: &str, now_ms: i64) -> Option<(ExitReason, OrderMode)> {
        let open = self.open.read();
        let position = open.get(id)?;
        let cfg = &self.config;
        let pnl = position.pnl_pct(position.current_price);
        let seconds_to_expiry = position.seconds_to_expiry(now_ms);

        if position.force_exit || seconds_to_expiry <= cfg.force_exit_sec {
            return Some((ExitReason::ForceExit, OrderMode::Taker));
        }
        if pnl <= -cfg.stop_loss_pct {
            return Some((ExitReason::StopLoss, OrderMode::Fok));
        }
        if pnl >= cfg.take_profit_pct {
            let mode = if cfg.maker_exits_for_tp_only { OrderMode::Maker } else { OrderMode::Taker };
            return Some((ExitReason::TakeProfit, mode));
        }

        let band = cfg.trailing_band_pct(seconds_to_expiry);
        if let Some(locked) = position.ratchet_locked_pnl_pct {
            if pnl < locked - band {
                return Some((ExitReason::Ratchet, OrderMode::Taker));
            }
        } else if position.peak_pnl_pct > 0.0 && pnl < position.peak_pnl_pct - band {
            return Some((ExitReason::TrailingStop, OrderMode::Taker));
        }

        if pnl >= cfg.stale_profit_pct {
            let bid_unchanged_sec = (now_ms - position.last_bid_changed_at_ms) as f64 / 1000.0;
            if bid_unchanged_sec >= cfg.stale_profit_bid_unchanged_sec {
                return Some((ExitReason::StaleProfit, OrderMode::Taker));
            }
        }

        if let Some(since) = position.stagnant_since_ms {
            let duration_sec = (now_ms - since) as f64 / 1000.0;
            if duration_sec >= cfg.stagnant_duration_sec {
                return Some((ExitReason::StagnantProfit, OrderMode::Taker));
            }
        }

        if position.peak_bid_depth > 0.0 {
            let threshold = position.peak_bid_depth * (cfg.depth_collapse_threshold_pct / 100.0);
            if position.current_bid_depth < threshold {
                return Some((ExitReason::DepthCollapse, OrderMode::Taker));
            }
        }

        None
    }

    pub fn close(&self, id: &str, exit_price: f64, reason: ExitReason, used_maker: bool, now_ms: i64) -> Option<ClosedPosition> {
        let position = self.open.write().remove(id)?;
        let pnl_pct = position.pnl_pct(exit_price);
        let asset = position.asset.clone();
        let closed = ClosedPosition {
            asset,
            open: position,
            exit_price,
            exit_reason: reason,
            used_maker,
            closed_at_ms: now_ms,
            pnl_pct,
        };
        self.last_sell_at_ms.write().insert(closed.asset.clone(), now_ms);
        self.closed.write().push(closed.clone());
        Some(closed)
    }

    pub fn get_open(&self, id: &str) -> Option<OpenPosition> {
        self.open.read().get(id).cloned()
    }

    pub fn open_positions(&self) -> Vec<OpenPosition> {
        self.open.read().values().cloned().collect()
    }

    pub fn closed_positions(&self) -> Vec<ClosedPosition> {
        self.closed.read().clone()
    }

    pub fn stats(&self) -> PositionStats {
        let closed = self.closed.read();
        let wins = closed.iter().filter(|c| c.pnl_pct > 0.0).count();
        let losses = closed.len() - wins;
        let total_pnl_pct: f64 = closed.iter().map(|c| c.pnl_pct).sum();
        let win_rate = if closed.is_empty() { 0.0 } else { wins as f64 / closed.len() as f64 };
        PositionStats {
            open_count: self.open.read().len(),
            closed_count: closed.len(),
            wins,
            losses,
            total_pnl_pct,
            win_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceLevel;

    fn manager() -> PositionManager {
        PositionManager::new(PositionManagerConfig::default())
    }

    fn book(best_bid: f64, bid_depth: f64) -> OrderbookSnapshot {
        OrderbookSnapshot::from_levels(
            "poly",
            "m1",
            "up",
            vec![PriceLevel { price: best_bid, size: bid_depth }],
            vec![PriceLevel { price: best_bid + 0.02, size: 10.0 }],
            0,
        )
    }

    #[test]
    fn stop_loss_fires_before_take_profit_check() {
        let pm = manager();
        let pos = pm.open("BTC", Direction::Up, "up", "c1", "momentum", 0.50, 10.0, 900_000, 0);
        pm.tick(&pos.id, 0.43, None, 1_000); // -14%, below 12% stop
        let exit = pm.check_exits(&pos.id, 1_000);
        assert_eq!(exit, Some((ExitReason::StopLoss, OrderMode::Fok)));
    }

    #[test]
    fn take_profit_fires_with_configured_maker_flag() {
        let pm = manager();
        let pos = pm.open("BTC", Direction::Up, "up", "c1", "momentum", 0.50, 10.0, 900_000, 0);
        pm.tick(&pos.id, 0.58, None, 1_000); // +16%
        let exit = pm.check_exits(&pos.id, 1_000);
        assert_eq!(exit, Some((ExitReason::TakeProfit, OrderMode::Maker)));
    }

    #[test]
    fn force_exit_fires_once_time_to_expiry_drops_below_threshold() {
        let pm = manager();
        let pos = pm.open("BTC", Direction::Up, "up", "c1", "momentum", 0.50, 10.0, 20_000, 0);
        pm.tick(&pos.id, 0.51, None, 5_000);
        // expires_at 20_000, now 10_000 -> 10s left, below force_exit_sec (30)
        let exit = pm.check_exits(&pos.id, 10_000);
        assert_eq!(exit, Some((ExitReason::ForceExit, OrderMode::Taker)));
    }

    #[test]
    fn ratchet_locks_after_confirm_ticks_and_exits_on_breach() {
        let pm = manager();
        let pos = pm.open("ETH", Direction::Up, "up", "c1", "momentum", 0.50, 10.0, 900_000, 0);
        // Establish a peak, then hold near it for the confirm window.
        pm.tick(&pos.id, 0.55, None, 1_000); // +10% new peak
        pm.tick(&pos.id, 0.549, None, 2_000); // within 0.5% tolerance, confirm 1
        pm.tick(&pos.id, 0.549, None, 3_000); // confirm 2
        pm.tick(&pos.id, 0.549, None, 4_000); // confirm 3 -> locks at ~10%
        let locked = pm.get_open(&pos.id).unwrap().ratchet_locked_pnl_pct;
        assert!(locked.is_some());
        // Fall more than the trailing band (wide, 15%, since far from expiry) below the
        // locked peak (10%), but not far enough to trip stop-loss (-12%) first.
        pm.tick(&pos.id, 0.46, None, 5_000); // pnl = -8%
        let exit = pm.check_exits(&pos.id, 5_000);
        assert_eq!(exit, Some((ExitReason::Ratchet, OrderMode::Taker)));
    }

    #[test]
    fn can_open_respects_concurrency_cap_and_per_asset_cooldown() {
        let mut cfg = PositionManagerConfig::default();
        cfg.max_concurrent_positions = 1;
        let pm = PositionManager::new(cfg);
        assert!(pm.can_open("BTC", 0));
        let pos = pm.open("BTC", Direction::Up, "up", "c1", "momentum", 0.5, 10.0, 900_000, 0);
        assert!(!pm.can_open("ETH", 0));
        pm.close(&pos.id, 0.5, ExitReason::TakeProfit, true, 1_000);
        assert!(!pm.can_open("BTC", 2_000));
        assert!(pm.can_open("BTC", 20_000));
    }

    #[test]
    fn stale_bid_triggers_stale_profit_exit() {
        let pm = manager();
        let pos = pm.open("SOL", Direction::Up, "up", "c1", "penny_clipper", 0.50, 10.0, 900_000, 0);
        pm.tick(&pos.id, 0.545, Some(&book(0.54, 20.0)), 1_000); // +9%, sets last_bid
        // Bid unchanged for longer than stale_profit_bid_unchanged_sec (7s).
        pm.tick(&pos.id, 0.545, Some(&book(0.54, 20.0)), 9_000);
        let exit = pm.check_exits(&pos.id, 9_000);
        assert_eq!(exit, Some((ExitReason::StaleProfit, OrderMode::Taker)));
    }
}
