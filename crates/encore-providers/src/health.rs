// SPDX-License-Identifier: GPL-3.0-or-later

use crate::circuit_breaker::CircuitState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Point-in-time health report for one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub model: String,
    pub circuit: CircuitState,
    pub total_requests: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub average_latency_ms: Option<u64>,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

impl ProviderHealth {
    pub fn is_healthy(&self) -> bool {
        self.circuit == CircuitState::Closed && self.consecutive_failures == 0
    }
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: u64,
    failures: u64,
    successes: u64,
    consecutive_failures: u32,
    total_latency_ms: u64,
    last_error: Option<String>,
    last_success: Option<DateTime<Utc>>,
}

/// Request counters shared between clones of a provider client.
#[derive(Debug, Clone, Default)]
pub(crate) struct HealthTracker {
    inner: Arc<Mutex<Counters>>,
}

impl HealthTracker {
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn record_success(&self, latency: Duration) {
        let mut counters = self.lock();
        counters.total_requests += 1;
        counters.successes += 1;
        counters.consecutive_failures = 0;
        counters.total_latency_ms += u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        counters.last_success = Some(Utc::now());
    }

    pub(crate) fn record_failure(&self, error: &str) {
        let mut counters = self.lock();
        counters.total_requests += 1;
        counters.failures += 1;
        counters.consecutive_failures += 1;
        counters.last_error = Some(error.to_string());
    }

    pub(crate) fn snapshot(&self, provider: &str, model: &str, circuit: CircuitState) -> ProviderHealth {
        let counters = self.lock();
        ProviderHealth {
            provider: provider.to_string(),
            model: model.to_string(),
            circuit,
            total_requests: counters.total_requests,
            failures: counters.failures,
            consecutive_failures: counters.consecutive_failures,
            average_latency_ms: (counters.successes > 0)
                .then(|| counters.total_latency_ms / counters.successes),
            last_error: counters.last_error.clone(),
            last_success: counters.last_success,
        }
    }
}
