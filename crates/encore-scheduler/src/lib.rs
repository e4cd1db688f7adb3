// SPDX-License-Identifier: GPL-3.0-or-later
pub mod job;
pub mod jobs;
pub mod registry;

use encore_application::ImportListService;
use encore_config::SchedulerConfig;
use encore_infrastructure::ImportListSink;
use jobs::{ImportListRefreshJob, RefreshStatus};
use registry::JobRegistry;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct Scheduler {
    config: SchedulerConfig,
    registry: JobRegistry,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let registry = JobRegistry::new(config.max_concurrent_jobs);
        Self { config, registry }
    }

    /// Register the periodic import list refresh. Returns a handle to the
    /// status of the last successful run.
    pub async fn register_refresh(
        &self,
        service: Arc<ImportListService>,
        sink: Arc<dyn ImportListSink>,
    ) -> Arc<Mutex<Option<RefreshStatus>>> {
        info!(
            target: "scheduler",
            interval_secs = self.config.refresh_interval_secs,
            "registering import list refresh"
        );
        let job = ImportListRefreshJob::new(service, sink);
        let status = job.status_handle();
        self.registry
            .register(
                "import-list-refresh",
                job,
                Schedule::Interval(self.config.refresh_interval_secs),
            )
            .await;
        status
    }

    /// Start all registered jobs; they stop when `cancel` fires.
    pub async fn start(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        self.registry.start(cancel).await
    }
}

pub use job::{Job, JobContext, JobResult, RetryPolicy};
pub use registry::Schedule;
