//! Per-upstream circuit breaker (spec §4.2/§4.5, invariants 4-7).
//!
//! Closed -> Open on the `failure_threshold`'th consecutive failure.
//! Open -> Half-Open once `reset_timeout` has elapsed since the trip.
//! Half-Open admits exactly one trial request; success closes the
//! breaker, failure reopens it with the backoff doubled (capped at
//! `MAX_BACKOFF_SECS`).
//!
//! Grounded on `original_source/services/http_client.py`'s
//! `CircuitBreaker` class (same three states, same failure-counter/
//! last-failure-time fields) and on the teacher's circuit breaker
//! reference material (`src/circuit_breaker_ref.rs`,
//! `src/circuit_breaker_manager_ref.rs`) for the atomic-state /
//! registry shape, adapted from a generic `execute()`-wrapping trait to
//! the gateway's concrete admit/on_success/on_failure protocol because
//! the proxy path needs to inspect breaker state *before* issuing the
//! request (to short-circuit without ever calling upstream) rather than
//! wrap the call itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const MAX_BACKOFF_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl From<CircuitState> for u8 {
    fn from(value: CircuitState) -> Self {
        match value {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

/// A single upstream host's breaker. Cheap to read concurrently: the
/// hot-path `admit()` check is a couple of atomic loads, no lock.
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    opened_at_millis: AtomicU64,
    current_backoff_secs: AtomicU64,
    /// Wall-clock unix-epoch millis of the failure that most recently
    /// tripped (or retripped) the breaker, 0 meaning "never" — set
    /// alongside `opened_at_millis`, which tracks the same event on the
    /// monotonic clock `admit()` needs
    /// (`original_source/services/http_client.py::record_failure` only
    /// sets `last_failure` once the threshold trips the circuit, not on
    /// every recorded failure).
    last_failure_millis: AtomicU64,
    failure_threshold: u32,
    base_reset_timeout: Duration,
    start: Instant,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed.into()),
            consecutive_failures: AtomicU64::new(0),
            opened_at_millis: AtomicU64::new(0),
            current_backoff_secs: AtomicU64::new(reset_timeout.as_secs().max(1)),
            last_failure_millis: AtomicU64::new(0),
            failure_threshold: failure_threshold.max(1),
            base_reset_timeout: reset_timeout,
            start: Instant::now(),
        }
    }

    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn wall_clock_now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Consecutive failures recorded since the last success (spec §6's
    /// health payload `failures` field).
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Wall-clock time of the most recent failure, or `None` if the
    /// breaker has never recorded one.
    pub fn last_failure_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let millis = self.last_failure_millis.load(Ordering::Acquire);
        if millis == 0 {
            return None;
        }
        chrono::DateTime::from_timestamp_millis(millis as i64)
    }

    /// The currently configured recovery/backoff window, in seconds
    /// (spec §6's health payload `recovery_time` field — the window
    /// itself, not the time remaining in it; see [`Self::retry_after_secs`]
    /// for the latter).
    pub fn recovery_time_secs(&self) -> u64 {
        self.current_backoff_secs.load(Ordering::Acquire)
    }

    /// Time remaining before an open breaker transitions to half-open,
    /// for the `Retry-After`-style hint in the 503 body.
    pub fn retry_after_secs(&self) -> u64 {
        let opened_at = self.opened_at_millis.load(Ordering::Acquire);
        let backoff_millis = self.current_backoff_secs.load(Ordering::Acquire) * 1000;
        let elapsed = self.now_millis().saturating_sub(opened_at);
        backoff_millis.saturating_sub(elapsed) / 1000
    }

    /// Called before issuing a request. `Closed` and `HalfOpen` admit;
    /// `Open` admits only after the backoff window has elapsed, at which
    /// point it flips to `HalfOpen` and admits the caller as the trial
    /// request (invariant 6: exactly one trial is let through).
    pub fn admit(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = self.opened_at_millis.load(Ordering::Acquire);
                let backoff_millis = self.current_backoff_secs.load(Ordering::Acquire) * 1000;
                if self.now_millis().saturating_sub(opened_at) >= backoff_millis {
                    self.state
                        .compare_exchange(
                            CircuitState::Open.into(),
                            CircuitState::HalfOpen.into(),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                } else {
                    false
                }
            }
        }
    }

    /// A successful call closes the breaker outright and resets the
    /// backoff to the configured base (invariant 5).
    pub fn on_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.current_backoff_secs
            .store(self.base_reset_timeout.as_secs().max(1), Ordering::Release);
        self.state.store(CircuitState::Closed.into(), Ordering::Release);
    }

    /// A failure in `Closed` increments the counter and trips once it
    /// reaches `failure_threshold`. A failure in `HalfOpen` reopens
    /// immediately and doubles the backoff, capped at
    /// `MAX_BACKOFF_SECS` (invariant 7).
    pub fn on_failure(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                self.reopen_with_doubled_backoff();
            }
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.failure_threshold as u64 {
                    self.trip();
                }
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&self) {
        self.opened_at_millis.store(self.now_millis(), Ordering::Release);
        self.last_failure_millis
            .store(Self::wall_clock_now_millis(), Ordering::Release);
        self.state.store(CircuitState::Open.into(), Ordering::Release);
    }

    fn reopen_with_doubled_backoff(&self) {
        let doubled = self
            .current_backoff_secs
            .load(Ordering::Acquire)
            .saturating_mul(2)
            .min(MAX_BACKOFF_SECS);
        self.current_backoff_secs.store(doubled, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at_millis.store(self.now_millis(), Ordering::Release);
        self.last_failure_millis
            .store(Self::wall_clock_now_millis(), Ordering::Release);
        self.state.store(CircuitState::Open.into(), Ordering::Release);
    }

    /// Administrative override (spec §4.11's `POST /admin/reset-circuit`).
    pub fn force_closed(&self) {
        self.on_success();
    }
}

/// Lazily creates one breaker per upstream host, never tears one down.
/// Grounded on `src/circuit_breaker_manager_ref.rs`'s
/// `RwLock<HashMap<String, Arc<...>>>` registry shape.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, std::sync::Arc<CircuitBreaker>>>,
    create_lock: Mutex<()>,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
            failure_threshold,
            reset_timeout,
        }
    }

    pub fn get_or_create(&self, host: &str) -> std::sync::Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().expect("registry poisoned").get(host) {
            return existing.clone();
        }
        let _guard = self.create_lock.lock().expect("registry poisoned");
        let mut write = self.breakers.write().expect("registry poisoned");
        write
            .entry(host.to_string())
            .or_insert_with(|| {
                std::sync::Arc::new(CircuitBreaker::new(self.failure_threshold, self.reset_timeout))
            })
            .clone()
    }

    /// Substring match against registered hosts for the admin reset
    /// endpoint (spec §4.11, grounded on
    /// `original_source/controllers/admin.py`'s loose name matching).
    pub fn find_by_substring(&self, needle: &str) -> Option<(String, std::sync::Arc<CircuitBreaker>)> {
        self.breakers
            .read()
            .expect("registry poisoned")
            .iter()
            .find(|(host, _)| host.contains(needle))
            .map(|(host, breaker)| (host.clone(), breaker.clone()))
    }

    pub fn list_hosts(&self) -> Vec<String> {
        self.breakers
            .read()
            .expect("registry poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed_and_admits() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.admit());
    }

    #[test]
    fn trips_open_after_threshold_failures() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn open_breaker_denies_admit_before_timeout() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(30));
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.admit());
    }

    #[test]
    fn open_breaker_admits_trial_after_timeout_elapses() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(0));
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.admit());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes_and_resets_backoff() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(0));
        cb.on_failure();
        assert!(cb.admit());
        cb.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.current_backoff_secs.load(Ordering::Acquire), 0.max(1));
    }

    #[test]
    fn half_open_failure_reopens_and_doubles_backoff() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(10));
        cb.on_failure();
        assert_eq!(cb.current_backoff_secs.load(Ordering::Acquire), 10);
        // force into half-open deterministically
        cb.state.store(CircuitState::HalfOpen.into(), Ordering::Release);
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.current_backoff_secs.load(Ordering::Acquire), 20);
    }

    #[test]
    fn backoff_caps_at_max() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(200));
        cb.on_failure();
        cb.state.store(CircuitState::HalfOpen.into(), Ordering::Release);
        cb.on_failure();
        assert_eq!(cb.current_backoff_secs.load(Ordering::Acquire), MAX_BACKOFF_SECS);
    }

    #[test]
    fn accessors_report_failure_count_and_recovery_window() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(30));
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(cb.last_failure_at().is_none());
        cb.on_failure();
        cb.on_failure();
        assert_eq!(cb.consecutive_failures(), 2);
        assert!(cb.last_failure_at().is_none(), "breaker hasn't tripped yet");
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.last_failure_at().is_some());
        assert_eq!(cb.recovery_time_secs(), 30);
    }

    #[test]
    fn force_closed_resets_state() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(30));
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.force_closed();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn registry_creates_once_per_host() {
        let registry = CircuitBreakerRegistry::new(3, Duration::from_secs(30));
        let a = registry.get_or_create("svc-a");
        let b = registry.get_or_create("svc-a");
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn registry_substring_match_finds_host() {
        let registry = CircuitBreakerRegistry::new(3, Duration::from_secs(30));
        registry.get_or_create("users-service.internal:8080");
        let found = registry.find_by_substring("users-service");
        assert!(found.is_some());
    }
}
