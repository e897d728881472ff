//! Circuit breaker per model provider.
//!
//! ```text
//! Closed ──(failure_threshold failures in window)──► Open
//!   ▲                                                  │
//!   └──(success_threshold successes)──── HalfOpen ◄─(cooldown elapsed)──┘
//! ```
//!
//! Failure counting is a sliding window: only failures younger than
//! `window` count toward opening. HalfOpen admits exactly one probe at a
//! time; the probe slot is released by recording its outcome, or by
//! [`CircuitBreaker::release_probe`] when the probe was cancelled (a
//! cancelled probe counts as neither success nor failure).

use cortex_types::{Component, Error, ErrorKind, ProviderId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Breaker configuration. Defaults: open after 5 windowed failures, close
/// after 2 half-open successes, 60 s cooldown, 60 s window.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within `window` required to open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes required to close it.
    pub success_threshold: u32,
    /// Time the circuit stays open before admitting a probe.
    pub cooldown: Duration,
    /// Sliding window over which failures are counted.
    pub window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(60),
            window: Duration::from_secs(60),
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass; failures are counted.
    Closed,
    /// Calls fail fast without touching the provider.
    Open,
    /// One probe at a time is admitted to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
            Self::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// What `check` granted the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Normal closed-state admission.
    Normal,
    /// The caller holds the single half-open probe slot and must report
    /// back via `record_success`, `record_failure`, or `release_probe`.
    Probe,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    success_count: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Thread-safe circuit breaker for one provider. Cheap to clone via
/// [`BreakerMap`]; state transitions are serialized by the inner mutex so
/// at most one probe is ever granted per half-open period.
pub struct CircuitBreaker {
    provider: ProviderId,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker in the Closed state.
    pub fn new(provider: ProviderId, config: CircuitBreakerConfig) -> Self {
        Self {
            provider,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                success_count: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Ask for admission. Open circuits fail fast with `CircuitOpen`;
    /// an open circuit whose cooldown has elapsed transitions to HalfOpen
    /// and grants the caller the probe slot.
    pub fn check(&self) -> Result<Admission, Error> {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.cooldown {
                    tracing::info!(provider = %self.provider, "circuit breaker half-open, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                } else {
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(self.open_error())
                } else {
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                }
            }
        }
    }

    /// Record a successful provider call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            CircuitState::Closed => {
                // Successes don't clear the window; only time does. A slow
                // trickle of failures under load should still open.
            }
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(provider = %self.provider, "circuit breaker closed (recovered)");
                    inner.state = CircuitState::Closed;
                    inner.failures.clear();
                    inner.success_count = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a provider failure that counts toward opening. The gateway
    /// only feeds provider/network failures here; remote rate limits,
    /// content filtering, validation errors, and cancellations never reach
    /// this method.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            CircuitState::Closed => {
                inner.failures.push_back(now);
                if let Some(horizon) = now.checked_sub(self.config.window) {
                    while inner.failures.front().is_some_and(|t| *t < horizon) {
                        inner.failures.pop_front();
                    }
                }
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    tracing::warn!(
                        provider = %self.provider,
                        failures = inner.failures.len(),
                        "circuit breaker opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                    inner.failures.clear();
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(provider = %self.provider, "circuit breaker reopened (probe failed)");
                inner.probe_in_flight = false;
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Release the probe slot without recording an outcome (the probe was
    /// cancelled before completing).
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock").state
    }

    /// The provider this breaker guards.
    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    fn open_error(&self) -> Error {
        Error::new(
            ErrorKind::CircuitOpen,
            Component::CircuitBreaker,
            format!("circuit open for provider {}", self.provider),
        )
    }
}

/// Lazily-populated map of breakers, one per provider, sharing a config.
pub struct BreakerMap {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<ProviderId, Arc<CircuitBreaker>>>,
}

impl BreakerMap {
    /// Create an empty map.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// The breaker for `provider`, created on first use.
    pub fn breaker_for(&self, provider: &ProviderId) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker map lock");
        Arc::clone(breakers.entry(provider.clone()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(provider.clone(), self.config.clone()))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_millis(100),
            window: Duration::from_secs(60),
        }
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(ProviderId::new("p1"), fast_config())
    }

    #[tokio::test]
    async fn starts_closed_and_admits() {
        let cb = breaker();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.check().unwrap(), Admission::Normal);
    }

    #[tokio::test]
    async fn opens_after_fifth_windowed_failure() {
        let cb = breaker();
        for _ in 0..4 {
            cb.record_failure();
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        let err = cb.check().unwrap_err();
        assert_eq!(err.kind, ErrorKind::CircuitOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_outside_window_do_not_count() {
        let cb = CircuitBreaker::new(
            ProviderId::new("p1"),
            CircuitBreakerConfig {
                window: Duration::from_millis(100),
                ..fast_config()
            },
        );
        for _ in 0..4 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_millis(200)).await;
        // The earlier four have aged out; this is failure #1 of a new window.
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_single_probe() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_millis(150)).await;

        assert_eq!(cb.check().unwrap(), Admission::Probe);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Second caller is rejected while the probe is out.
        assert_eq!(cb.check().unwrap_err().kind, ErrorKind::CircuitOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn closes_after_two_probe_successes() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_millis(150)).await;

        assert_eq!(cb.check().unwrap(), Admission::Probe);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.check().unwrap(), Admission::Probe);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_reopens_and_restarts_cooldown() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(cb.check().unwrap(), Admission::Probe);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // Cooldown restarted: still open shortly after.
        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(cb.check().unwrap_err().kind, ErrorKind::CircuitOpen);
        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(cb.check().unwrap(), Admission::Probe);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_probe_releases_slot_without_outcome() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure();
        }
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(cb.check().unwrap(), Admission::Probe);
        cb.release_probe();
        // Slot free again, state unchanged.
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.check().unwrap(), Admission::Probe);
    }

    #[tokio::test]
    async fn breaker_map_is_per_provider() {
        let map = BreakerMap::new(fast_config());
        let a = map.breaker_for(&ProviderId::new("a"));
        for _ in 0..5 {
            a.record_failure();
        }
        assert_eq!(a.state(), CircuitState::Open);
        assert_eq!(map.breaker_for(&ProviderId::new("b")).state(), CircuitState::Closed);
        // Same provider resolves to the same breaker.
        assert_eq!(map.breaker_for(&ProviderId::new("a")).state(), CircuitState::Open);
    }
}
