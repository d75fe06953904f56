// =============================================================================
// Next-run computation for each schedule kind
// =============================================================================

use chrono::{Datelike, TimeZone, Timelike, Utc};

use crate::cron::types::Schedule;

/// Compute the next run time in Unix-epoch milliseconds, or `None` if the
/// schedule is a one-shot `at` that has already passed.
pub fn next_run_ms(schedule: &Schedule, now_ms: i64) -> Option<i64> {
    match schedule {
        Schedule::At { at_ms } => {
            if *at_ms > now_ms {
                Some(*at_ms)
            } else {
                None
            }
        }
        Schedule::Every { interval_ms, anchor_ms } => {
            let anchor = anchor_ms.unwrap_or(now_ms);
            if *interval_ms <= 0 {
                return Some(now_ms);
            }
            let elapsed = now_ms - anchor;
            let periods = if elapsed <= 0 {
                0
            } else {
                (elapsed + interval_ms - 1) / interval_ms
            };
            Some(anchor + periods * interval_ms)
        }
        Schedule::Cron { expr } => Some(next_cron_run_ms(expr, now_ms)),
    }
}

/// Parse at minute/hour granularity only; day-of-month, month, and
/// day-of-week fields are accepted but not honored. Malformed expressions
/// fall back to "one minute from now".
fn next_cron_run_ms(expr: &str, now_ms: i64) -> i64 {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return now_ms + 60_000;
    }

    let minute = match parse_field(fields[0]) {
        Some(m) => m,
        None => return now_ms + 60_000,
    };
    let hour = match parse_field(fields[1]) {
        Some(h) => h,
        None => return now_ms + 60_000,
    };

    let now = Utc.timestamp_millis_opt(now_ms).single().unwrap_or_else(Utc::now);
    let target_minute = minute.unwrap_or(now.minute());
    let target_hour = hour.unwrap_or(now.hour());

    let mut candidate = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), target_hour, target_minute, 0)
        .single()
        .unwrap_or(now);

    if candidate.timestamp_millis() <= now_ms {
        candidate += chrono::Duration::days(1);
    }

    candidate.timestamp_millis()
}

/// `*` means any (returns `None`); a numeric literal pins that field.
fn parse_field(field: &str) -> Option<Option<u32>> {
    if field == "*" {
        return Some(None);
    }
    field.parse::<u32>().ok().map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_job_next_run_is_monotonic_by_interval() {
        let schedule = Schedule::Every {
            interval_ms: 30_000,
            anchor_ms: Some(0),
        };
        let k0 = next_run_ms(&schedule, 1).unwrap();
        let schedule_k1 = Schedule::Every {
            interval_ms: 30_000,
            anchor_ms: Some(0),
        };
        let k1 = next_run_ms(&schedule_k1, k0 + 1).unwrap();
        assert_eq!(k1, k0 + 30_000);
    }

    #[test]
    fn at_schedule_in_the_past_returns_none() {
        let schedule = Schedule::At { at_ms: 100 };
        assert!(next_run_ms(&schedule, 200).is_none());
    }

    #[test]
    fn malformed_cron_falls_back_to_one_minute() {
        let schedule = Schedule::Cron { expr: "not a cron".into() };
        let now = 1_000_000;
        assert_eq!(next_run_ms(&schedule, now), Some(now + 60_000));
    }

    #[test]
    fn cron_wildcard_minute_hour_matches_immediately_next_minute() {
        // 12:00:00.000Z, Jan 1 2024
        let now_ms = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap().timestamp_millis();
        let schedule = Schedule::Cron { expr: "0 13 * * *".into() };
        let next = next_run_ms(&schedule, now_ms).unwrap();
        let next_dt = Utc.timestamp_millis_opt(next).single().unwrap();
        assert_eq!(next_dt.hour(), 13);
        assert_eq!(next_dt.minute(), 0);
    }
}
