//! Configuration types.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause taken at the start of every round, after the round is claimed.
    pub round_start_delay: Duration,
    /// Run one round immediately on startup before waiting for the first tick.
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            round_start_delay: Duration::ZERO,
            run_on_start: false,
        }
    }
}

impl SchedulerConfig {
    /// Read overrides from `PIPELINE_ROUND_DELAY_MS` and `PIPELINE_RUN_ON_START`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("PIPELINE_ROUND_DELAY_MS") {
            let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "PIPELINE_ROUND_DELAY_MS".to_string(),
                message: format!("expected milliseconds, got '{raw}'"),
            })?;
            config.round_start_delay = Duration::from_millis(ms);
        }

        if let Ok(raw) = std::env::var("PIPELINE_RUN_ON_START") {
            config.run_on_start = parse_bool("PIPELINE_RUN_ON_START", &raw)?;
        }

        Ok(config)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{raw}'"),
        }),
    }
}

/// A pipeline definition file: the jobs to register with the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFile {
    pub jobs: Vec<JobDefinition>,
}

/// One job entry in a pipeline file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Five-field cron expression, evaluated in UTC.
    pub schedule: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub action: JobAction,
}

/// What a configured job does when it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobAction {
    /// Call a pipeline service endpoint.
    Http {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: Option<serde_json::Value>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    /// Run a shell command.
    Command {
        command: String,
        #[serde(default)]
        workdir: Option<PathBuf>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

fn default_method() -> String {
    "POST".to_string()
}

impl PipelineFile {
    /// Load and validate a JSON pipeline file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let file: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        file.validate()?;
        Ok(file)
    }

    /// Structural checks. Dependency and cron checks happen at registration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "jobs".to_string(),
                hint: "Define at least one job.".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for job in &self.jobs {
            if job.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "jobs[].name".to_string(),
                    message: "job name must not be empty".to_string(),
                });
            }
            if !seen.insert(job.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: format!("jobs.{}", job.name),
                    message: "duplicate job name".to_string(),
                });
            }
            job.action.validate(&job.name)?;
        }
        Ok(())
    }
}

impl JobAction {
    fn validate(&self, job: &str) -> Result<(), ConfigError> {
        match self {
            JobAction::Http { url, method, .. } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::InvalidValue {
                        key: format!("jobs.{job}.action.url"),
                        message: format!("'{url}' is not an http(s) URL"),
                    });
                }
                if reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes()).is_err() {
                    return Err(ConfigError::InvalidValue {
                        key: format!("jobs.{job}.action.method"),
                        message: format!("'{method}' is not an HTTP method"),
                    });
                }
            }
            JobAction::Command { command, .. } => {
                if command.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: format!("jobs.{job}.action.command"),
                        message: "command must not be empty".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Per-job timeout, if one was configured.
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            JobAction::Http { timeout_secs, .. } | JobAction::Command { timeout_secs, .. } => {
                timeout_secs.map(Duration::from_secs)
            }
        }
    }
}
