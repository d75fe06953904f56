// =============================================================================
// Cron Service — schedule, payload, and job types
// =============================================================================

use serde::{Deserialize, Serialize};

pub type JobId = String;
pub type AlertId = String;

/// Sealed schedule kinds. `Cron` is parsed at minute/hour granularity only;
/// day-of-month, month, and day-of-week fields are accepted but treated as
/// `*` — documented as the contract rather than full 5-field cron.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Fire once at the given Unix-epoch millisecond timestamp.
    At { at_ms: i64 },
    /// Fire every `interval_ms`, anchored at `anchor_ms` (defaults to now
    /// on first scheduling).
    Every {
        interval_ms: i64,
        #[serde(default)]
        anchor_ms: Option<i64>,
    },
    /// Five-field cron expression, minute/hour fields honored.
    Cron { expr: String },
}

/// Sealed payload kinds a job can carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CronPayload {
    SystemEvent { text: String },
    AgentTurn {
        message: String,
        #[serde(default)]
        options: serde_json::Value,
    },
    Alert { alert_id: AlertId },
    MarketCheck { venue: String, market_id: String },
    AlertScan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Ok,
    Error,
}

/// Which session a job's `agentTurn` payload should be executed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionTarget {
    #[default]
    Main,
    Isolated,
}

/// Whether firing the job should wake the target session immediately or
/// wait for its next natural heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WakeMode {
    NextHeartbeat,
    #[default]
    Now,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: JobId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Agent that owns this job, if created on an agent's behalf rather
    /// than directly by a user.
    #[serde(default)]
    pub agent_id: Option<String>,
    pub schedule: Schedule,
    pub payload: CronPayload,
    #[serde(default)]
    pub session_target: SessionTarget,
    #[serde(default)]
    pub wake_mode: WakeMode,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub delete_after_run: bool,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub updated_at_ms: i64,
    #[serde(default)]
    pub next_run_at_ms: Option<i64>,
    #[serde(default)]
    pub last_run_at_ms: Option<i64>,
    #[serde(default)]
    pub last_status: Option<JobStatus>,
    #[serde(default)]
    pub last_duration_ms: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(skip, default)]
    pub running: bool,
}

fn default_true() -> bool {
    true
}

impl CronJob {
    pub fn new(id: impl Into<String>, name: impl Into<String>, schedule: Schedule, payload: CronPayload) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            agent_id: None,
            schedule,
            payload,
            session_target: SessionTarget::default(),
            wake_mode: WakeMode::default(),
            enabled: true,
            delete_after_run: false,
            created_at_ms: now,
            updated_at_ms: now,
            next_run_at_ms: None,
            last_run_at_ms: None,
            last_status: None,
            last_duration_ms: None,
            last_error: None,
            running: false,
        }
    }
}

/// A user's price alert, as the `alert`/`alertScan` payload handlers see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub user_id: String,
    pub venue: String,
    pub market_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub condition: AlertCondition,
    pub enabled: bool,
    pub triggered: bool,
    #[serde(default)]
    pub last_triggered_at_ms: Option<i64>,
}

/// Context the scan loop assembles from the feed before evaluating a
/// condition: current price plus whatever ancillary data the condition
/// kind needs (the previous observed price for a cross, the current
/// spread for a liquidity condition).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertCheckContext {
    pub price: f64,
    pub previous_price: Option<f64>,
    pub spread_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AlertCondition {
    PriceAbove { threshold: f64 },
    PriceBelow { threshold: f64 },
    /// Fires the instant price moves from one side of `threshold` to the
    /// other, in either direction. Requires a previous price; with none
    /// available yet it never fires on the first observation.
    PriceCross { threshold: f64 },
    /// Fires when the market's bid/ask spread narrows below `threshold`
    /// (expressed as a fraction, e.g. 0.01 for 1%).
    SpreadBelow { threshold: f64 },
}

impl AlertCondition {
    pub fn crossed(&self, ctx: &AlertCheckContext) -> bool {
        match self {
            Self::PriceAbove { threshold } => ctx.price > *threshold,
            Self::PriceBelow { threshold } => ctx.price < *threshold,
            Self::PriceCross { threshold } => match ctx.previous_price {
                Some(prev) => (prev <= *threshold) != (ctx.price <= *threshold),
                None => false,
            },
            Self::SpreadBelow { threshold } => {
                ctx.spread_pct.map(|s| s < *threshold).unwrap_or(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(price: f64) -> AlertCheckContext {
        AlertCheckContext { price, previous_price: None, spread_pct: None }
    }

    #[test]
    fn price_above_crosses_strictly_greater() {
        let cond = AlertCondition::PriceAbove { threshold: 0.60 };
        assert!(cond.crossed(&ctx(0.61)));
        assert!(!cond.crossed(&ctx(0.60)));
    }

    #[test]
    fn price_cross_requires_a_previous_observation() {
        let cond = AlertCondition::PriceCross { threshold: 0.5 };
        assert!(!cond.crossed(&AlertCheckContext { price: 0.6, previous_price: None, spread_pct: None }));
        assert!(cond.crossed(&AlertCheckContext { price: 0.6, previous_price: Some(0.4), spread_pct: None }));
        assert!(!cond.crossed(&AlertCheckContext { price: 0.6, previous_price: Some(0.55), spread_pct: None }));
    }

    #[test]
    fn spread_below_fires_only_when_spread_known_and_narrow() {
        let cond = AlertCondition::SpreadBelow { threshold: 0.02 };
        assert!(!cond.crossed(&ctx(0.5)));
        assert!(cond.crossed(&AlertCheckContext { price: 0.5, previous_price: None, spread_pct: Some(0.01) }));
        assert!(!cond.crossed(&AlertCheckContext { price: 0.5, previous_price: None, spread_pct: Some(0.05) }));
    }
}
