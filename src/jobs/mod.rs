//! Concrete job kinds and pipeline-file registration.

pub mod command;
pub mod http;

use std::path::Path;
use std::sync::Arc;

use reqwest::Method;

use crate::config::{JobAction, JobDefinition, PipelineFile};
use crate::error::{Result, SchedulerError};
use crate::scheduler::{Job, JobScheduler};

pub use command::CommandJob;
pub use http::HttpJob;

/// Turn a configured definition into a job.
pub fn build_job(def: &JobDefinition, client: &reqwest::Client) -> Arc<dyn Job> {
    match &def.action {
        JobAction::Http {
            url,
            method,
            headers,
            body,
            timeout_secs: _,
        } => {
            // Methods are checked when the file is loaded.
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .unwrap_or(Method::POST);
            let mut job = HttpJob::new(&def.name, client.clone(), method, url)
                .with_description(def.description.clone())
                .with_dependencies(def.dependencies.clone());
            for (key, value) in headers {
                job = job.with_header(key, value);
            }
            if let Some(body) = body {
                job = job.with_json_body(body.clone());
            }
            if let Some(timeout) = def.action.timeout() {
                job = job.with_timeout(timeout);
            }
            Arc::new(job)
        }
        JobAction::Command {
            command,
            workdir,
            timeout_secs: _,
        } => {
            let mut job = CommandJob::new(&def.name, command)
                .with_description(def.description.clone())
                .with_dependencies(def.dependencies.clone());
            if let Some(dir) = workdir {
                job = job.with_workdir(dir.clone());
            }
            if let Some(timeout) = def.action.timeout() {
                job = job.with_timeout(timeout);
            }
            Arc::new(job)
        }
    }
}

/// Register every job in `file`, then validate the whole graph.
///
/// Jobs may reference each other in any order within the file. If anything
/// fails, every job registered by this call is removed again.
pub async fn register_pipeline(
    scheduler: &Arc<JobScheduler>,
    file: &PipelineFile,
    client: &reqwest::Client,
) -> std::result::Result<usize, SchedulerError> {
    let mut registered: Vec<&str> = Vec::with_capacity(file.jobs.len());

    let outcome = async {
        for def in &file.jobs {
            scheduler
                .register_job(build_job(def, client), &def.schedule, false)
                .await?;
            registered.push(&def.name);
        }
        scheduler.validate_graph().await
    }
    .await;

    if let Err(e) = outcome {
        for name in registered.iter().rev() {
            if let Err(rollback) = scheduler.remove_job(name).await {
                tracing::warn!(job = %name, error = %rollback, "Rollback failed to remove job");
            }
        }
        return Err(e);
    }

    tracing::info!(jobs = registered.len(), "Pipeline registered");
    Ok(registered.len())
}

/// Load a pipeline file from disk and register its jobs.
pub async fn load_pipeline(
    scheduler: &Arc<JobScheduler>,
    path: &Path,
    client: &reqwest::Client,
) -> Result<usize> {
    let file = PipelineFile::load(path)?;
    let count = register_pipeline(scheduler, &file, client).await?;
    tracing::info!(path = %path.display(), jobs = count, "Pipeline loaded");
    Ok(count)
}
