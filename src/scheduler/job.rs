//! The job contract and per-round results.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// A named unit of asynchronous work.
///
/// Implementations are supplied by the pipeline stages (feed ingestion,
/// analysis, social lookup, ...). The scheduler only cares whether
/// `execute()` succeeds.
#[async_trait]
pub trait Job: Send + Sync {
    /// Unique, stable name. Used as the dependency graph key.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Jobs that must succeed earlier in the same round before this one runs.
    fn dependencies(&self) -> &[String] {
        &[]
    }

    /// Run the job.
    async fn execute(&self) -> Result<(), JobError>;
}

type JobFn = Box<dyn Fn() -> BoxFuture<'static, Result<(), JobError>> + Send + Sync>;

/// A job backed by an async closure.
pub struct FnJob {
    name: String,
    description: Option<String>,
    dependencies: Vec<String>,
    run: JobFn,
}

impl FnJob {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: None,
            dependencies: Vec::new(),
            run: Box::new(move || run().boxed()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }
}

impl std::fmt::Debug for FnJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnJob")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for FnJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    async fn execute(&self) -> Result<(), JobError> {
        (self.run)().await
    }
}

/// Outcome of one job in one execution round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_name: String,
    pub success: bool,
    /// Wall-clock time spent in `execute()`. Zero when skipped.
    pub execution_time_ms: u64,
    /// False when a declared dependency did not succeed earlier in the round.
    pub dependencies_met: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobResult {
    pub fn succeeded(job_name: &str, elapsed: Duration) -> Self {
        Self {
            job_name: job_name.to_string(),
            success: true,
            execution_time_ms: elapsed.as_millis() as u64,
            dependencies_met: true,
            skipped_reason: None,
            error: None,
            message: Some(format!("Completed in {}ms", elapsed.as_millis())),
        }
    }

    pub fn failed(job_name: &str, elapsed: Duration, error: &JobError) -> Self {
        Self {
            job_name: job_name.to_string(),
            success: false,
            execution_time_ms: elapsed.as_millis() as u64,
            dependencies_met: true,
            skipped_reason: None,
            error: Some(error.to_string()),
            message: None,
        }
    }

    /// A job that was not run because `missing` did not complete this round.
    pub fn skipped(job_name: &str, missing: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            success: false,
            execution_time_ms: 0,
            dependencies_met: false,
            skipped_reason: Some(format!(
                "Dependency '{missing}' did not complete successfully"
            )),
            error: None,
            message: None,
        }
    }

    pub fn was_skipped(&self) -> bool {
        !self.dependencies_met
    }
}

/// Aggregate counts for a round, used for the end-of-round log line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoundSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed_ms: u64,
}

impl RoundSummary {
    pub fn from_results(results: &[JobResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            if result.success {
                summary.succeeded += 1;
            } else if result.was_skipped() {
                summary.skipped += 1;
            } else {
                summary.failed += 1;
            }
            summary.elapsed_ms += result.execution_time_ms;
        }
        summary
    }

    /// True when every job in the round succeeded.
    pub fn is_clean(&self) -> bool {
        self.succeeded == self.total
    }
}

impl std::fmt::Display for RoundSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} jobs: {} succeeded, {} failed, {} skipped ({}ms)",
            self.total, self.succeeded, self.failed, self.skipped, self.elapsed_ms
        )
    }
}
