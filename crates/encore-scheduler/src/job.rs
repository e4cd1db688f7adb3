// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Execution context handed to each job run
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub execution_time: DateTime<Utc>,
    pub attempt: u32,
    /// Cancelled when the scheduler shuts down
    pub cancel: CancellationToken,
}

impl JobContext {
    pub fn new(job_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            job_id: job_id.into(),
            execution_time: Utc::now(),
            attempt: 1,
            cancel,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum JobResult {
    Success,
    Failure { error: String, retry: bool },
}

/// How often a failed run is retried before waiting for the next tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        delay: Duration::ZERO,
    };
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(60),
        }
    }
}

#[async_trait::async_trait]
pub trait Job: Send + Sync {
    /// Stable identifier used in logs, e.g. `import-list-refresh`
    fn job_type(&self) -> &'static str;

    async fn execute(&self, ctx: JobContext) -> Result<JobResult>;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }
}
