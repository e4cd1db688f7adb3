// SPDX-License-Identifier: GPL-3.0-or-later

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Per-provider circuit breaker.
///
/// Opens after `failure_threshold` consecutive failures. Once `cooldown` has
/// passed a single trial request is let through (half-open); its outcome
/// closes the circuit again or re-opens it for another cooldown.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!(target: "providers", breaker = self.name, "circuit breaker mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Returns a permit when a request may be sent now.
    ///
    /// The permit must be settled with [`CallPermit::success`] or
    /// [`CallPermit::failure`]. A permit dropped unsettled (the request future
    /// was cancelled or timed out) frees the half-open trial slot without
    /// changing the failure count.
    pub fn try_acquire(&self) -> Option<CallPermit> {
        let mut inner = self.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|opened| opened.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if !cooled_down {
                    return None;
                }
                info!(target: "providers", breaker = self.name, "circuit half-open, allowing trial request");
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return None;
                }
                inner.trial_in_flight = true;
                true
            }
        };

        Some(CallPermit {
            breaker: self.clone(),
            trial,
            settled: false,
        })
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(target: "providers", breaker = self.name, "circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        inner.trial_in_flight = false;

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            warn!(
                target: "providers",
                breaker = self.name,
                failures = inner.consecutive_failures,
                cooldown = ?self.cooldown,
                "circuit opened"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
            debug!(target: "providers", breaker = self.name, "trial request abandoned, slot released");
            inner.trial_in_flight = false;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }
}

/// Admission for one request through a [`CircuitBreaker`].
#[derive(Debug)]
#[must_use = "settle the permit with success() or failure()"]
pub struct CallPermit {
    breaker: CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl CallPermit {
    /// True when this request is the single half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}
