use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::error::{Result, SchedulerError};
use crate::types::Schedule;

/// Compute the next UTC execution time for `schedule`, strictly after
/// `from`.
///
/// Returns `None` when the schedule is exhausted (an `At` whose instant
/// has passed) or unparseable.
pub fn compute_next_run(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Every { every_ms } => {
            Some(from + Duration::milliseconds((*every_ms).max(1) as i64))
        }

        Schedule::At { at_ms } => {
            let at = Utc.timestamp_millis_opt(*at_ms).single()?;
            if at > from {
                Some(at)
            } else {
                None
            }
        }

        Schedule::Cron { expr, tz } => match next_cron_run(expr, tz, from) {
            Ok(next) => next,
            Err(e) => {
                warn!(expr, tz, error = %e, "cron schedule unparseable; next_run not set");
                None
            }
        },
    }
}

/// Validate a cron expression + timezone pair without scheduling it.
pub fn validate_cron(expr: &str, tz: &str) -> Result<()> {
    parse_tz(tz)?;
    cron::Schedule::from_str(&normalize_cron(expr))
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;
    Ok(())
}

pub(crate) fn parse_tz(tz: &str) -> Result<Tz> {
    tz.parse::<Tz>()
        .map_err(|_| SchedulerError::UnknownTimezone(tz.to_string()))
}

fn next_cron_run(expr: &str, tz: &str, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let tz = parse_tz(tz)?;
    let schedule = cron::Schedule::from_str(&normalize_cron(expr))
        .map_err(|e| SchedulerError::InvalidSchedule(e.to_string()))?;

    let next = schedule
        .after(&from.with_timezone(&tz))
        .next()
        .map(|dt| dt.with_timezone(&Utc));
    Ok(next)
}

/// The cron crate wants a seconds field; classic five-field expressions
/// get one prepended.
fn normalize_cron(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_adds_the_interval() {
        let from = Utc::now();
        let next = compute_next_run(&Schedule::Every { every_ms: 3_600_000 }, from).unwrap();
        assert_eq!((next - from).num_seconds(), 3600);
    }

    #[test]
    fn at_fires_only_in_the_future() {
        let from = Utc::now();
        let future = from + Duration::minutes(5);
        let next = compute_next_run(
            &Schedule::At {
                at_ms: future.timestamp_millis(),
            },
            from,
        );
        assert_eq!(next.unwrap().timestamp_millis(), future.timestamp_millis());

        let past = from - Duration::minutes(5);
        assert!(compute_next_run(
            &Schedule::At {
                at_ms: past.timestamp_millis()
            },
            from
        )
        .is_none());
    }

    #[test]
    fn five_field_cron_is_accepted() {
        let from = Utc::now();
        let next = compute_next_run(
            &Schedule::Cron {
                expr: "0 2 * * *".to_string(),
                tz: "UTC".to_string(),
            },
            from,
        )
        .unwrap();
        assert!(next > from);
        assert_eq!(next.format("%H:%M").to_string(), "02:00");
    }

    #[test]
    fn cron_respects_timezone() {
        let from = Utc::now();
        let utc_next = compute_next_run(
            &Schedule::Cron {
                expr: "0 9 * * *".to_string(),
                tz: "UTC".to_string(),
            },
            from,
        )
        .unwrap();
        let tokyo_next = compute_next_run(
            &Schedule::Cron {
                expr: "0 9 * * *".to_string(),
                tz: "Asia/Tokyo".to_string(),
            },
            from,
        )
        .unwrap();
        // 9am Tokyo is midnight UTC; the two instants differ by 9 hours
        // modulo a day.
        assert_ne!(utc_next, tokyo_next);
    }

    #[test]
    fn bad_cron_and_bad_tz_are_rejected() {
        assert!(validate_cron("not a cron", "UTC").is_err());
        assert!(matches!(
            validate_cron("0 2 * * *", "Mars/Olympus"),
            Err(SchedulerError::UnknownTimezone(_))
        ));
        assert!(validate_cron("0 2 * * *", "Europe/London").is_ok());
    }
}
