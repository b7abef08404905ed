//! # Circuit Breaker
//!
//! Per-sub-provider circuit breaker (spec §4.6). Unlike a generic breaker
//! that opens on any failure, this one only reacts to failures the caller
//! marks `critical` — the Error Classifier (spec §4.11) decides that, not
//! this module. `half_open` allows exactly one probe, matching the spec's
//! "allow exactly one probe" wording rather than a configurable burst.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive critical errors before the circuit opens.
    pub failure_threshold: u32,
    /// Cooldown before a half-open probe is allowed.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_errors: u32,
    last_error_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
    /// Whether the single half-open probe slot has been handed out.
    probe_in_flight: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_errors: 0,
            last_error_at: None,
            next_attempt_at: None,
            probe_in_flight: false,
        }
    }
}

/// Circuit breaker for a single sub-provider.
///
/// Owned by the `SubProviderState` it protects (spec §5: "owned state on
/// the object that produces it"), not a process-wide registry.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Whether this sub-provider may currently be selected. A `half_open`
    /// transition (spec §4.6: `open -> half_open` once `now >=
    /// next_attempt_at`) happens lazily, the first time this is called
    /// after the cooldown elapses.
    pub async fn is_selectable(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !inner.probe_in_flight,
            CircuitState::Open => {
                let Some(next_attempt) = inner.next_attempt_at else {
                    return false;
                };
                if Instant::now() >= next_attempt {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = false;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Reserve the single half-open probe slot. Call this right before
    /// dispatching a request to a half-open sub-provider; `is_selectable`
    /// alone does not claim the slot, to avoid a race between selection
    /// and dispatch granting two concurrent probes.
    pub async fn reserve_probe(&self) -> bool {
        let mut inner = self.inner.write().await;
        if inner.state == CircuitState::HalfOpen && !inner.probe_in_flight {
            inner.probe_in_flight = true;
            true
        } else {
            inner.state != CircuitState::HalfOpen
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    /// Record a successful call. In `half_open` this closes the circuit;
    /// non-critical successes elsewhere just clear the consecutive count.
    pub async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        inner.consecutive_errors = 0;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            tracing::info!("circuit breaker closing after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.next_attempt_at = None;
    }

    /// Record a failure. Only `is_critical = true` failures move the
    /// state machine (spec §4.6); non-critical failures are tracked by the
    /// caller for per-request exclusion only.
    pub async fn record_failure(&self, is_critical: bool) {
        if !is_critical {
            return;
        }
        let mut inner = self.inner.write().await;
        inner.last_error_at = Some(Instant::now());
        inner.probe_in_flight = false;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.next_attempt_at = Some(Instant::now() + self.config.cooldown);
                tracing::warn!("circuit breaker probe failed, reopening");
            }
            CircuitState::Closed | CircuitState::Open => {
                inner.consecutive_errors += 1;
                if inner.consecutive_errors >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.next_attempt_at = Some(Instant::now() + self.config.cooldown);
                    tracing::warn!(
                        consecutive_errors = inner.consecutive_errors,
                        "circuit breaker opening"
                    );
                }
            }
        }
    }

    pub async fn consecutive_errors(&self) -> u32 {
        self.inner.read().await.consecutive_errors
    }

    pub async fn next_attempt_at(&self) -> Option<Instant> {
        self.inner.read().await.next_attempt_at
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

pub type SharedCircuitBreaker = Arc<CircuitBreaker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_until_threshold_critical_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_millis(50),
        });
        assert!(cb.is_selectable().await);
        cb.record_failure(true).await;
        cb.record_failure(true).await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        cb.record_failure(true).await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.is_selectable().await);
    }

    #[tokio::test]
    async fn non_critical_failures_never_open_circuit() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            cooldown: Duration::from_millis(50),
        });
        for _ in 0..10 {
            cb.record_failure(false).await;
        }
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_allows_single_probe_then_closes_on_success() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_millis(10),
        });
        cb.record_failure(true).await;
        assert_eq!(cb.state().await, CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cb.is_selectable().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        assert!(cb.reserve_probe().await);
        assert!(!cb.reserve_probe().await);
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            cooldown: Duration::from_millis(10),
        });
        cb.record_failure(true).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cb.is_selectable().await);
        cb.reserve_probe().await;
        cb.record_failure(true).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }
}
