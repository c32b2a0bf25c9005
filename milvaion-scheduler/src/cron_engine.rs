use chrono::{DateTime, Utc};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid cron expression {expression:?}: {reason}")]
pub struct CronError {
    pub expression: String,
    pub reason: String,
}

/// Parses five-field unix-style cron expressions (`minute hour day-of-month month
/// day-of-week`) and computes the next UTC firing strictly after a base instant.
///
/// The underlying `cron` crate expects a leading seconds field; a `"0"` is prepended
/// at the parser boundary so job authors keep writing the familiar five-field form.
pub struct CronEngine;

impl CronEngine {
    /// Validates an expression without computing a fire time. Used at job-creation
    /// time so a malformed cron expression surfaces as a validation error, not a
    /// Dispatcher-time Fatal.
    pub fn validate(expression: &str) -> Result<(), CronError> {
        Self::parse(expression).map(|_| ())
    }

    pub fn next(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        let schedule = Self::parse(expression)?;
        schedule
            .after(&after)
            .next()
            .ok_or_else(|| CronError {
                expression: expression.to_string(),
                reason: "expression never fires again after the given instant".to_string(),
            })
    }

    fn parse(expression: &str) -> Result<cron::Schedule, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError {
                expression: expression.to_string(),
                reason: format!(
                    "expected 5 fields (minute hour day-of-month month day-of-week), got {}",
                    fields.len()
                ),
            });
        }
        let with_seconds = format!("0 {expression}");
        cron::Schedule::from_str(&with_seconds).map_err(|e| CronError {
            expression: expression.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rejects_expressions_with_wrong_field_count() {
        assert!(CronEngine::validate("* * * *").is_err());
        assert!(CronEngine::validate("0 * * * * *").is_err());
    }

    #[test]
    fn computes_next_five_minute_boundary() {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 10, 2, 30).unwrap();
        let next = CronEngine::next("*/5 * * * *", base).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 10, 5, 0).unwrap());
    }

    #[test]
    fn next_is_strictly_after_base() {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 10, 5, 0).unwrap();
        let next = CronEngine::next("*/5 * * * *", base).unwrap();
        assert!(next > base);
    }

    #[test]
    fn rejects_malformed_expression() {
        assert!(CronEngine::validate("99 * * * *").is_err());
    }
}
