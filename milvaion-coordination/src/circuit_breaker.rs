use milvaion_common::config::CircuitBreakerConfig;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    total_operations: u64,
    total_failures: u64,
    stats_reset_at: Instant,
}

/// Wraps every coordination-store call behind a Closed/Open/HalfOpen state machine.
/// Each call site supplies its own fallback value, so `Open` degrades a cycle rather
/// than failing the caller.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
                total_operations: 0,
                total_failures: 0,
                stats_reset_at: Instant::now(),
            }),
        }
    }

    fn should_probe(&self, inner: &Inner) -> bool {
        inner.state == State::Open
            && inner
                .opened_at
                .map(|t| t.elapsed() >= Duration::from_secs(self.config.open_timeout_seconds))
                .unwrap_or(true)
    }

    fn maybe_reset_stats(&self, inner: &mut Inner) {
        if inner.stats_reset_at.elapsed() >= Duration::from_secs(self.config.stats_reset_hours * 3600)
        {
            inner.total_operations = 0;
            inner.total_failures = 0;
            inner.stats_reset_at = Instant::now();
        }
    }

    /// Executes `op` unless the breaker is `Open` (and not yet due for a probe), in
    /// which case `fallback` is returned without calling `op` at all.
    pub async fn call<T, E, F, Fut>(&self, op_name: &str, fallback: T, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let allow = {
            let mut inner = self.inner.lock().unwrap();
            self.maybe_reset_stats(&mut inner);
            match inner.state {
                State::Closed => true,
                State::HalfOpen => true,
                State::Open => {
                    if self.should_probe(&inner) {
                        inner.state = State::HalfOpen;
                        true
                    } else {
                        false
                    }
                }
            }
        };

        if !allow {
            return fallback;
        }

        let result = op().await;

        let mut inner = self.inner.lock().unwrap();
        inner.total_operations += 1;
        match result {
            Ok(value) => {
                inner.consecutive_failures = 0;
                inner.state = State::Closed;
                inner.opened_at = None;
                value
            }
            Err(err) => {
                inner.total_failures += 1;
                inner.consecutive_failures += 1;
                warn!(op = op_name, error = %err, "coordination store call failed");
                if inner.state == State::HalfOpen
                    || inner.consecutive_failures >= self.config.failure_threshold
                {
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                }
                fallback
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().unwrap().state == State::Open
    }

    pub fn stats(&self) -> (u64, u64) {
        let inner = self.inner.lock().unwrap();
        (inner.total_operations, inner.total_failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_consecutive_failures_and_probes_after_timeout() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            open_timeout_seconds: 0,
            stats_reset_hours: 1,
        });
        for _ in 0..2 {
            let out = breaker
                .call("test", 0, || async { Err::<i32, &str>("boom") })
                .await;
            assert_eq!(out, 0);
        }
        assert!(breaker.is_open());
        let out = breaker.call("test", -1, || async { Ok::<i32, &str>(7) }).await;
        assert_eq!(out, 7);
        assert!(!breaker.is_open());
    }
}
