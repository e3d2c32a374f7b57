//! Execution engine: runs one round of jobs in dependency order.
//!
//! A round is strictly sequential: each job is awaited to completion before
//! the next starts. A job only runs if every one of its dependencies
//! succeeded earlier in the same round; a failure or skip cascades to all
//! transitive dependents.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures::FutureExt;
use uuid::Uuid;

use crate::error::JobError;
use crate::scheduler::job::{Job, JobResult};

/// Holds the scheduler's "round in flight" flag for the duration of a round.
///
/// The flag is taken with a single compare-exchange, so two callers can never
/// both believe they own the round. It is released on drop, which also covers
/// a round that unwinds.
pub(crate) struct RoundGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RoundGuard<'a> {
    pub(crate) fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Run `jobs`, which must already be in topological order.
pub(crate) async fn run_jobs(round_id: Uuid, jobs: &[Arc<dyn Job>]) -> Vec<JobResult> {
    let mut completed: HashSet<String> = HashSet::new();
    let mut results = Vec::with_capacity(jobs.len());

    for job in jobs {
        let name = job.name();

        if let Some(missing) = job
            .dependencies()
            .iter()
            .find(|dep| !completed.contains(dep.as_str()))
        {
            tracing::warn!(
                round = %round_id,
                job = %name,
                dependency = %missing,
                "Skipping job: dependency did not complete this round"
            );
            results.push(JobResult::skipped(name, missing));
            continue;
        }

        let result = run_job(round_id, job.as_ref()).await;
        if result.success {
            completed.insert(name.to_string());
        }
        results.push(result);
    }

    results
}

/// Execute a single job, turning an error or a panic into a failed result.
async fn run_job(round_id: Uuid, job: &dyn Job) -> JobResult {
    let name = job.name();
    tracing::debug!(round = %round_id, job = %name, "Starting job");

    let start = Instant::now();
    let outcome = match AssertUnwindSafe(job.execute()).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(JobError::Panicked(panic_message(payload.as_ref()))),
    };
    let elapsed = start.elapsed();

    match outcome {
        Ok(()) => {
            tracing::info!(
                round = %round_id,
                job = %name,
                elapsed_ms = elapsed.as_millis() as u64,
                "Job completed"
            );
            JobResult::succeeded(name, elapsed)
        }
        Err(e) => {
            tracing::error!(
                round = %round_id,
                job = %name,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "Job failed"
            );
            JobResult::failed(name, elapsed, &e)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
