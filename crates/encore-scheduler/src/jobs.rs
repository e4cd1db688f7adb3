// SPDX-License-Identifier: GPL-3.0-or-later
use crate::job::{Job, JobContext, JobResult, RetryPolicy};
use anyhow::Result;
use chrono::{DateTime, Utc};
use encore_application::{ImportListService, RecommendationError};
use encore_infrastructure::ImportListSink;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Summary of the last successful refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshStatus {
    pub completed_at: DateTime<Utc>,
    pub items: usize,
    pub from_cache: bool,
}

/// Regenerates the import list and publishes it to the sink.
///
/// A failed cycle publishes nothing, so the last good list stays in place
/// until the next successful run.
pub struct ImportListRefreshJob {
    service: Arc<ImportListService>,
    sink: Arc<dyn ImportListSink>,
    last_success: Arc<Mutex<Option<RefreshStatus>>>,
}

impl ImportListRefreshJob {
    pub fn new(service: Arc<ImportListService>, sink: Arc<dyn ImportListSink>) -> Self {
        Self {
            service,
            sink,
            last_success: Arc::new(Mutex::new(None)),
        }
    }

    /// Shared handle to the last successful refresh, readable after the job
    /// has been moved into the registry.
    pub fn status_handle(&self) -> Arc<Mutex<Option<RefreshStatus>>> {
        self.last_success.clone()
    }

    pub fn last_success(&self) -> Option<RefreshStatus> {
        self.last_success
            .lock()
            .unwrap_or_else(|poisoned| {
                warn!(target: "jobs", "refresh status mutex poisoned, recovering");
                poisoned.into_inner()
            })
            .clone()
    }
}

#[async_trait::async_trait]
impl Job for ImportListRefreshJob {
    fn job_type(&self) -> &'static str {
        "import-list-refresh"
    }

    async fn execute(&self, ctx: JobContext) -> Result<JobResult> {
        info!(target: "jobs", job_id = %ctx.job_id, attempt = ctx.attempt, "refreshing import list");

        match self.service.refresh(self.sink.as_ref(), &ctx.cancel).await {
            Ok(report) => {
                let status = RefreshStatus {
                    completed_at: Utc::now(),
                    items: report.items.len(),
                    from_cache: report.from_cache,
                };
                info!(
                    target: "jobs",
                    items = status.items,
                    from_cache = status.from_cache,
                    "import list refreshed"
                );
                *self.last_success.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
                    Some(status);
                Ok(JobResult::Success)
            }
            Err(RecommendationError::Cancelled) => Ok(JobResult::Failure {
                error: "refresh cancelled".to_string(),
                retry: false,
            }),
            Err(RecommendationError::Library(error)) => Ok(JobResult::Failure {
                error: format!("library unavailable: {error:#}"),
                retry: true,
            }),
            Err(error) => Ok(JobResult::Failure {
                error: error.to_string(),
                retry: true,
            }),
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            delay: Duration::from_secs(120),
        }
    }
}
