use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Upstream circuit breaker (spec §4.2): backs off `min(60, failures^2)`
/// seconds after an upstream-phase failure, resetting on the first success.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
}

#[derive(Debug, Clone, Copy)]
struct BreakerState {
    failures: u32,
    last_failure: Option<Instant>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BreakerState {
                failures: 0,
                last_failure: None,
            }),
        }
    }

    /// `true` if a new connection should be rejected without touching
    /// upstream.
    pub fn is_open(&self) -> bool {
        let state = self.state.lock().expect("breaker mutex poisoned");
        match state.last_failure {
            None => false,
            Some(at) => at.elapsed() < backoff_for(state.failures),
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        state.failures = 0;
        state.last_failure = None;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        state.failures = state.failures.saturating_add(1);
        state.last_failure = Some(Instant::now());
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.lock().expect("breaker mutex poisoned");
        BreakerSnapshot {
            failures: state.failures,
            open: match state.last_failure {
                None => false,
                Some(at) => at.elapsed() < backoff_for(state.failures),
            },
        }
    }
}

fn backoff_for(failures: u32) -> Duration {
    let secs = (failures as u64).saturating_mul(failures as u64).min(60);
    Duration::from_secs(secs)
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerSnapshot {
    pub failures: u32,
    pub open: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_until_first_failure() {
        let b = CircuitBreaker::new();
        assert!(!b.is_open());
    }

    #[test]
    fn opens_after_failure_and_is_capped_at_sixty_seconds() {
        assert_eq!(backoff_for(0), Duration::from_secs(0));
        assert_eq!(backoff_for(1), Duration::from_secs(1));
        assert_eq!(backoff_for(7), Duration::from_secs(49));
        assert_eq!(backoff_for(8), Duration::from_secs(60));
        assert_eq!(backoff_for(100), Duration::from_secs(60));
    }

    #[test]
    fn success_resets_counter() {
        let b = CircuitBreaker::new();
        b.record_failure();
        assert!(b.is_open());
        b.record_success();
        assert!(!b.is_open());
        assert_eq!(b.snapshot().failures, 0);
    }
}
