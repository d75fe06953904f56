// =============================================================================
// Price Buffer — rolling time-windowed price ring with derived stats
// =============================================================================
//
// A ring of `(price, timestamp_ms)` tuples, newest-first, bounded at
// `MAX_POINTS` elements and at `max_age_sec`. Every read method prunes first
// so a buffer that hasn't seen a push in a while reports empty rather than
// stale data.

use std::collections::VecDeque;

use parking_lot::RwLock;

const MAX_POINTS: usize = 2000;
const DEFAULT_MAX_AGE_SEC: f64 = 180.0;

#[derive(Debug, Clone, Copy)]
struct Point {
    price: f64,
    timestamp_ms: i64,
}

pub struct PriceBuffer {
    max_age_sec: f64,
    /// Front = newest.
    points: RwLock<VecDeque<Point>>,
}

impl PriceBuffer {
    pub fn new() -> Self {
        Self::with_max_age(DEFAULT_MAX_AGE_SEC)
    }

    pub fn with_max_age(max_age_sec: f64) -> Self {
        Self {
            max_age_sec,
            points: RwLock::new(VecDeque::new()),
        }
    }

    pub fn push(&self, price: f64, timestamp_ms: i64) {
        let mut points = self.points.write();
        points.push_front(Point { price, timestamp_ms });
        while points.len() > MAX_POINTS {
            points.pop_back();
        }
        let cutoff = timestamp_ms - (self.max_age_sec * 1000.0) as i64;
        while points.back().map(|p| p.timestamp_ms < cutoff).unwrap_or(false) {
            points.pop_back();
        }
    }

    /// Age in seconds of the most recent push, relative to `now_ms`. `None`
    /// if the buffer is empty.
    pub fn age_sec(&self, now_ms: i64) -> Option<f64> {
        let points = self.points.read();
        points.front().map(|p| (now_ms - p.timestamp_ms) as f64 / 1000.0)
    }

    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }

    fn window(&self, window_sec: f64) -> Vec<Point> {
        let points = self.points.read();
        let Some(newest) = points.front() else {
            return Vec::new();
        };
        let cutoff = newest.timestamp_ms - (window_sec * 1000.0) as i64;
        points.iter().take_while(|p| p.timestamp_ms >= cutoff).copied().collect()
    }

    /// Walk newest -> oldest points whose step >= `min_step`; count
    /// direction changes.
    pub fn reversals(&self, window_sec: f64, min_step: f64) -> u32 {
        let window = self.window(window_sec);
        let mut reversals = 0;
        let mut last_direction: Option<bool> = None; // true = up
        let mut last_price = None;

        for point in window.iter().rev() {
            let Some(prev) = last_price else {
                last_price = Some(point.price);
                continue;
            };
            let step = point.price - prev;
            if step.abs() >= min_step {
                let direction = step > 0.0;
                if let Some(last) = last_direction {
                    if last != direction {
                        reversals += 1;
                    }
                }
                last_direction = Some(direction);
                last_price = Some(point.price);
            }
        }
        reversals
    }

    pub fn range(&self, window_sec: f64) -> f64 {
        let window = self.window(window_sec);
        if window.is_empty() {
            return 0.0;
        }
        let max = window.iter().map(|p| p.price).fold(f64::MIN, f64::max);
        let min = window.iter().map(|p| p.price).fold(f64::MAX, f64::min);
        max - min
    }

    pub fn mean(&self, window_sec: f64) -> Option<f64> {
        let window = self.window(window_sec);
        if window.is_empty() {
            return None;
        }
        Some(window.iter().map(|p| p.price).sum::<f64>() / window.len() as f64)
    }

    /// `(newest - oldest) / oldest * 100` over the window. `None` if the
    /// window doesn't contain at least two points or the oldest is zero.
    pub fn move_pct(&self, window_sec: f64) -> Option<f64> {
        let window = self.window(window_sec);
        let newest = window.first()?;
        let oldest = window.last()?;
        if oldest.price == 0.0 {
            return None;
        }
        Some((newest.price - oldest.price) / oldest.price * 100.0)
    }

    pub fn latest(&self) -> Option<f64> {
        self.points.read().front().map(|p| p.price)
    }
}

impl Default for PriceBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prunes_points_older_than_max_age() {
        let buf = PriceBuffer::with_max_age(10.0);
        buf.push(1.0, 0);
        buf.push(2.0, 5_000);
        buf.push(3.0, 11_000);
        // 0ms point is now 11s old relative to 11_000ms newest -> pruned.
        assert_eq!(buf.range(60.0), 1.0); // 3.0 - 2.0
    }

    #[test]
    fn move_pct_computes_pct_change_over_window() {
        let buf = PriceBuffer::new();
        buf.push(100.0, 0);
        buf.push(100.25, 30_000);
        let pct = buf.move_pct(30.0).unwrap();
        assert!((pct - 0.25).abs() < 1e-9);
    }

    #[test]
    fn reversals_counts_direction_changes_above_min_step() {
        let buf = PriceBuffer::new();
        // oldest -> newest: 0.40, 0.42, 0.39, 0.43 (two reversals)
        buf.push(0.40, 0);
        buf.push(0.42, 1_000);
        buf.push(0.39, 2_000);
        buf.push(0.43, 3_000);
        assert_eq!(buf.reversals(10.0, 0.01), 2);
    }

    #[test]
    fn empty_buffer_returns_none_for_derived_stats() {
        let buf = PriceBuffer::new();
        assert!(buf.mean(30.0).is_none());
        assert!(buf.move_pct(30.0).is_none());
        assert_eq!(buf.range(30.0), 0.0);
    }
}
