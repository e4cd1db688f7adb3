// SPDX-License-Identifier: GPL-3.0-or-later
use crate::job::{Job, JobContext, JobResult};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Run immediately, then every `n` seconds
    Interval(u64),
    /// Run once immediately
    Once,
}

struct RegisteredJob {
    job_id: String,
    job: Arc<dyn Job>,
    schedule: Schedule,
}

/// Holds scheduled jobs and runs them under a shared concurrency limit.
///
/// A job never overlaps with itself: the next tick waits for the previous run
/// and ticks missed meanwhile are skipped.
pub struct JobRegistry {
    jobs: RwLock<Vec<RegisteredJob>>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl JobRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            jobs: RwLock::new(Vec::new()),
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub async fn register(&self, job_id: impl Into<String>, job: impl Job + 'static, schedule: Schedule) {
        let job_id = job_id.into();
        info!(target: "scheduler", %job_id, job_type = job.job_type(), ?schedule, "registering job");

        let mut jobs = self.jobs.write().await;
        jobs.retain(|registered| registered.job_id != job_id);
        jobs.push(RegisteredJob {
            job_id,
            job: Arc::new(job),
            schedule,
        });
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Spawn one driver task per job. The tasks end once `cancel` fires.
    pub async fn start(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        info!(target: "scheduler", max_concurrent = self.max_concurrent, "starting job registry");

        let jobs = self.jobs.read().await;
        let handles = jobs
            .iter()
            .map(|registered| {
                let job_id = registered.job_id.clone();
                let job = registered.job.clone();
                let schedule = registered.schedule;
                let permits = self.permits.clone();
                let cancel = cancel.clone();

                tokio::spawn(async move {
                    match schedule {
                        Schedule::Interval(seconds) => {
                            let mut ticker = interval(Duration::from_secs(seconds.max(1)));
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                            loop {
                                tokio::select! {
                                    _ = cancel.cancelled() => break,
                                    _ = ticker.tick() => {}
                                }
                                run_with_permit(&permits, &job_id, &job, &cancel).await;
                            }
                        }
                        Schedule::Once => run_with_permit(&permits, &job_id, &job, &cancel).await,
                    }
                    info!(target: "scheduler", %job_id, "job driver stopped");
                })
            })
            .collect();

        info!(target: "scheduler", "job registry started with {} jobs", jobs.len());
        handles
    }
}

async fn run_with_permit(
    permits: &Arc<Semaphore>,
    job_id: &str,
    job: &Arc<dyn Job>,
    cancel: &CancellationToken,
) {
    let permit = tokio::select! {
        _ = cancel.cancelled() => return,
        permit = permits.clone().acquire_owned() => permit,
    };
    if let Ok(_permit) = permit {
        execute_job(job_id, job.as_ref(), cancel).await;
    }
}

/// Run a job, retrying per its policy. Returns the final result.
pub async fn execute_job(job_id: &str, job: &dyn Job, cancel: &CancellationToken) -> JobResult {
    let policy = job.retry_policy();
    let max_attempts = policy.max_retries + 1;
    let mut ctx = JobContext::new(job_id, cancel.clone());

    loop {
        info!(
            target: "scheduler",
            %job_id,
            job_type = job.job_type(),
            attempt = ctx.attempt,
            max_attempts,
            "executing job"
        );

        let (error, retry) = match job.execute(ctx.clone()).await {
            Ok(JobResult::Success) => {
                info!(target: "scheduler", %job_id, attempts = ctx.attempt, "job completed successfully");
                return JobResult::Success;
            }
            Ok(JobResult::Failure { error, retry }) => (error, retry),
            Err(err) => (format!("{err:#}"), true),
        };

        error!(target: "scheduler", %job_id, attempt = ctx.attempt, %error, retry, "job failed");
        if !retry || ctx.attempt >= max_attempts || cancel.is_cancelled() {
            if retry && ctx.attempt >= max_attempts {
                error!(target: "scheduler", %job_id, "job exhausted all retry attempts");
            }
            return JobResult::Failure { error, retry };
        }

        warn!(target: "scheduler", %job_id, delay = ?policy.delay, "retrying job after delay");
        tokio::select! {
            _ = cancel.cancelled() => return JobResult::Failure { error, retry: false },
            _ = tokio::time::sleep(policy.delay) => {}
        }
        ctx.attempt += 1;
    }
}
