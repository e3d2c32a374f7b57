//! Error types for the feed pipeline.

use std::time::Duration;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the scheduler itself.
///
/// Everything except `UnresolvedOrder` is a registration-time error and is
/// returned straight to the caller of `register_job` / `remove_job`.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid cron schedule '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("Job '{job}' depends on '{dependency}', which is not registered")]
    DependencyNotFound { job: String, dependency: String },

    #[error("Circular dependency detected at job '{job}': {}", .cycle.join(" -> "))]
    CircularDependency { job: String, cycle: Vec<String> },

    #[error("Job '{name}' is already registered")]
    DuplicateJob { name: String },

    #[error("Job '{name}' not found")]
    JobNotFound { name: String },

    #[error("Execution order resolved {resolved} of {total} jobs; the graph contains a cycle")]
    UnresolvedOrder { resolved: usize, total: usize },
}

/// Failure reported by a job's `execute()`.
///
/// The execution engine records these in the round's results and keeps going.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    #[error("HTTP request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("Command exited with status {code}: {output}")]
    Command { code: i32, output: String },

    #[error("Command could not be run: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    /// Shorthand for a plain failure message.
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
