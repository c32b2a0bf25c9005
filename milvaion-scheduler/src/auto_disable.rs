use chrono::{DateTime, Duration, Utc};
use milvaion_common::model::{AutoDisableConfig, AutoDisableState, OccurrenceStatus};

/// Outcome of evaluating one terminal status report against a job's auto-disable
/// policy. `disable` tells the caller whether to deactivate the job in the catalog
/// and remove it from the schedule index.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoDisableOutcome {
    pub state: AutoDisableState,
    pub disable: bool,
}

/// Pure function: `(config, state, now, newStatus) -> outcome`. Unit-testable in
/// isolation from the catalog, coordination store, and bus.
pub fn evaluate(
    config: &AutoDisableConfig,
    state: &AutoDisableState,
    now: DateTime<Utc>,
    new_status: OccurrenceStatus,
) -> AutoDisableOutcome {
    if new_status == OccurrenceStatus::Completed {
        return AutoDisableOutcome {
            state: AutoDisableState {
                consecutive_failure_count: 0,
                last_failure_time: state.last_failure_time,
                disabled_at: state.disabled_at,
            },
            disable: false,
        };
    }

    if !config.enabled {
        return AutoDisableOutcome {
            state: state.clone(),
            disable: false,
        };
    }

    let is_failure = matches!(
        new_status,
        OccurrenceStatus::Failed | OccurrenceStatus::TimedOut | OccurrenceStatus::Unknown
    );
    if !is_failure {
        return AutoDisableOutcome {
            state: state.clone(),
            disable: false,
        };
    }

    let window = Duration::minutes(config.window_minutes);
    let stale = state
        .last_failure_time
        .map(|t| now - t > window)
        .unwrap_or(false);
    let base_count = if stale { 0 } else { state.consecutive_failure_count };
    let consecutive_failure_count = base_count + 1;

    let disable = consecutive_failure_count >= config.threshold;
    let disabled_at = if disable { Some(now) } else { state.disabled_at };

    AutoDisableOutcome {
        state: AutoDisableState {
            consecutive_failure_count,
            last_failure_time: Some(now),
            disabled_at,
        },
        disable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32) -> AutoDisableConfig {
        AutoDisableConfig {
            enabled: true,
            threshold,
            window_minutes: 60,
        }
    }

    #[test]
    fn completed_resets_counter() {
        let state = AutoDisableState {
            consecutive_failure_count: 4,
            last_failure_time: Some(Utc::now()),
            disabled_at: None,
        };
        let outcome = evaluate(&config(5), &state, Utc::now(), OccurrenceStatus::Completed);
        assert_eq!(outcome.state.consecutive_failure_count, 0);
        assert!(!outcome.disable);
    }

    #[test]
    fn disables_at_threshold() {
        let mut state = AutoDisableState::default();
        let cfg = config(3);
        let now = Utc::now();
        for _ in 0..2 {
            let outcome = evaluate(&cfg, &state, now, OccurrenceStatus::Failed);
            assert!(!outcome.disable);
            state = outcome.state;
        }
        let outcome = evaluate(&cfg, &state, now, OccurrenceStatus::Failed);
        assert!(outcome.disable);
        assert_eq!(outcome.state.consecutive_failure_count, 3);
        assert_eq!(outcome.state.disabled_at, Some(now));
    }

    #[test]
    fn stale_failure_window_resets_before_incrementing() {
        let state = AutoDisableState {
            consecutive_failure_count: 4,
            last_failure_time: Some(Utc::now() - Duration::minutes(120)),
            disabled_at: None,
        };
        let outcome = evaluate(&config(5), &state, Utc::now(), OccurrenceStatus::Failed);
        assert_eq!(outcome.state.consecutive_failure_count, 1);
        assert!(!outcome.disable);
    }

    #[test]
    fn disabled_policy_never_disables() {
        let mut cfg = config(1);
        cfg.enabled = false;
        let state = AutoDisableState::default();
        let outcome = evaluate(&cfg, &state, Utc::now(), OccurrenceStatus::Failed);
        assert!(!outcome.disable);
        assert_eq!(outcome.state.consecutive_failure_count, 0);
    }
}
