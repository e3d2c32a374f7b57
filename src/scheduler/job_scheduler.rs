//! The job scheduler: registry, schedule groups, and round execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::scheduler::engine::{self, RoundGuard};
use crate::scheduler::graph::DependencyGraph;
use crate::scheduler::job::{Job, JobResult, RoundSummary};
use crate::scheduler::schedule::CronSchedule;
use crate::scheduler::trigger::{CronTrigger, TriggerState};

struct RegisteredJob {
    job: Arc<dyn Job>,
    schedule: String,
}

/// Registered jobs, keyed by name, plus their registration order.
#[derive(Default)]
struct Registry {
    jobs: HashMap<String, RegisteredJob>,
    order: Vec<String>,
}

impl Registry {
    fn entries(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.order.iter().filter_map(|name| {
            self.jobs
                .get(name)
                .map(|entry| (name.as_str(), entry.job.dependencies()))
        })
    }

    fn graph(&self) -> DependencyGraph {
        DependencyGraph::new(self.entries())
    }

    /// The graph as it would look with `job` added.
    fn graph_with(&self, job: &dyn Job) -> DependencyGraph {
        DependencyGraph::new(
            self.entries()
                .chain(std::iter::once((job.name(), job.dependencies()))),
        )
    }

    fn dependents_of(&self, name: &str) -> Vec<String> {
        self.entries()
            .filter(|(_, deps)| deps.iter().any(|d| d == name))
            .map(|(job, _)| job.to_string())
            .collect()
    }
}

/// Snapshot of one schedule group, for status output.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleInfo {
    pub expression: String,
    pub jobs: Vec<String>,
    pub state: TriggerState,
    pub next_fire: Option<DateTime<Utc>>,
}

/// Dependency-aware cron scheduler.
///
/// Jobs are registered under a cron expression; every distinct expression
/// gets one trigger. Whenever any trigger fires (or `execute_round` is called
/// directly) every registered job is considered, in dependency order, and at
/// most one round is ever in flight.
pub struct JobScheduler {
    config: SchedulerConfig,
    registry: RwLock<Registry>,
    triggers: RwLock<HashMap<String, CronTrigger>>,
    started: AtomicBool,
    executing: AtomicBool,
    rounds_completed: AtomicU64,
}

impl JobScheduler {
    /// Create a new scheduler.
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: RwLock::new(Registry::default()),
            triggers: RwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
            executing: AtomicBool::new(false),
            rounds_completed: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register a job under a cron expression.
    ///
    /// With `validate_dependencies`, every dependency must already be
    /// registered and the resulting graph must be acyclic; on failure nothing
    /// is registered. Without it, checks are deferred to `validate_graph`.
    pub async fn register_job(
        self: &Arc<Self>,
        job: Arc<dyn Job>,
        cron_expression: &str,
        validate_dependencies: bool,
    ) -> Result<(), SchedulerError> {
        let schedule = CronSchedule::parse(cron_expression)?;
        let name = job.name().to_string();

        let mut registry = self.registry.write().await;
        if registry.jobs.contains_key(&name) {
            return Err(SchedulerError::DuplicateJob { name });
        }

        if validate_dependencies && !job.dependencies().is_empty() {
            let graph = registry.graph_with(job.as_ref());
            graph.check_references(&name)?;
            graph.detect_cycles()?;
        }

        let dependencies = job.dependencies().to_vec();
        registry.order.push(name.clone());
        registry.jobs.insert(
            name.clone(),
            RegisteredJob {
                job,
                schedule: cron_expression.to_string(),
            },
        );

        let mut triggers = self.triggers.write().await;
        drop(registry);
        let trigger = triggers
            .entry(cron_expression.to_string())
            .or_insert_with(|| {
                debug!(schedule = %cron_expression, "Creating trigger");
                CronTrigger::new(schedule)
            });
        trigger.add_job(&name);
        if self.started.load(Ordering::Acquire) {
            trigger.arm(Arc::downgrade(self));
        }

        info!(
            job = %name,
            schedule = %cron_expression,
            dependencies = ?dependencies,
            "Registered job"
        );
        Ok(())
    }

    /// Remove a job. Its trigger is discarded once no job uses it.
    ///
    /// Jobs that depend on it stay registered and will be skipped.
    pub async fn remove_job(&self, name: &str) -> Result<(), SchedulerError> {
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.jobs.remove(name) else {
            return Err(SchedulerError::JobNotFound {
                name: name.to_string(),
            });
        };
        registry.order.retain(|n| n != name);

        let dependents = registry.dependents_of(name);
        if !dependents.is_empty() {
            warn!(
                job = %name,
                dependents = ?dependents,
                "Removed job still has dependents; they will be skipped"
            );
        }

        let mut triggers = self.triggers.write().await;
        drop(registry);
        if let Some(trigger) = triggers.get_mut(&entry.schedule) {
            trigger.remove_job(name);
            if trigger.is_empty() {
                trigger.disarm();
                triggers.remove(&entry.schedule);
                debug!(schedule = %entry.schedule, "Discarded empty trigger");
            }
        }

        info!(job = %name, "Removed job");
        Ok(())
    }

    /// Check the whole registry: every dependency exists and there are no
    /// cycles.
    pub async fn validate_graph(&self) -> Result<(), SchedulerError> {
        let graph = self.registry.read().await.graph();
        graph.check_all_references()?;
        graph.detect_cycles()
    }

    /// Every registered job name, each after its dependencies.
    pub async fn resolve_order(&self) -> Result<Vec<String>, SchedulerError> {
        self.registry.read().await.graph().resolve_order()
    }

    /// Run every registered job once, in dependency order.
    ///
    /// Returns an empty list if another round is already in flight. Job
    /// failures are recorded in the results; they never abort the round.
    pub async fn execute_round(&self) -> Vec<JobResult> {
        let Some(_guard) = RoundGuard::acquire(&self.executing) else {
            warn!("Scheduler busy: a round is already running, skipping");
            return Vec::new();
        };

        let round_id = Uuid::new_v4();
        if !self.config.round_start_delay.is_zero() {
            tokio::time::sleep(self.config.round_start_delay).await;
        }

        let jobs: Vec<Arc<dyn Job>> = {
            let registry = self.registry.read().await;
            match registry.graph().resolve_order() {
                Ok(order) => order
                    .iter()
                    .filter_map(|name| registry.jobs.get(name).map(|e| Arc::clone(&e.job)))
                    .collect(),
                Err(e) => {
                    error!(round = %round_id, error = %e, "Cannot order jobs, round aborted");
                    return Vec::new();
                }
            }
        };

        info!(round = %round_id, jobs = jobs.len(), "Execution round started");
        let results = engine::run_jobs(round_id, &jobs).await;
        let summary = RoundSummary::from_results(&results);
        self.rounds_completed.fetch_add(1, Ordering::Relaxed);

        if summary.is_clean() {
            info!(round = %round_id, %summary, "Execution round finished");
        } else {
            warn!(round = %round_id, %summary, "Execution round finished with failures");
        }
        results
    }

    /// Fire the trigger for `expression` by hand. `None` if no such trigger.
    pub async fn fire_schedule(&self, expression: &str) -> Option<Vec<JobResult>> {
        if !self.triggers.read().await.contains_key(expression) {
            return None;
        }
        info!(schedule = %expression, "Manual trigger fire");
        Some(self.execute_round().await)
    }

    /// Arm every trigger. Calling it again is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut triggers = self.triggers.write().await;
        self.started.store(true, Ordering::Release);
        for trigger in triggers.values_mut() {
            trigger.arm(Arc::downgrade(self));
        }
        info!(triggers = triggers.len(), "Scheduler started");
    }

    /// Run one round now, log each outcome, then arm the triggers.
    pub async fn start_with_immediate_execution(self: &Arc<Self>) -> Vec<JobResult> {
        info!("Running initial round before arming triggers");
        let results = self.execute_round().await;
        for result in &results {
            if result.success {
                info!(
                    job = %result.job_name,
                    elapsed_ms = result.execution_time_ms,
                    "Initial run succeeded"
                );
            } else if let Some(reason) = &result.skipped_reason {
                warn!(job = %result.job_name, reason = %reason, "Initial run skipped");
            } else {
                error!(
                    job = %result.job_name,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Initial run failed"
                );
            }
        }
        self.start().await;
        results
    }

    /// Disarm every trigger. An in-flight round is left to finish.
    pub async fn stop(&self) {
        let mut triggers = self.triggers.write().await;
        self.started.store(false, Ordering::Release);
        for trigger in triggers.values_mut() {
            trigger.disarm();
        }
        info!(triggers = triggers.len(), "Scheduler stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    /// Number of rounds that have run to completion.
    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed.load(Ordering::Relaxed)
    }

    /// Registered job names in registration order.
    pub async fn job_names(&self) -> Vec<String> {
        self.registry.read().await.order.clone()
    }

    pub async fn job_count(&self) -> usize {
        self.registry.read().await.jobs.len()
    }

    pub async fn trigger_count(&self) -> usize {
        self.triggers.read().await.len()
    }

    /// Schedule groups, sorted by expression.
    pub async fn schedules(&self) -> Vec<ScheduleInfo> {
        let triggers = self.triggers.read().await;
        let mut infos: Vec<ScheduleInfo> = triggers
            .values()
            .map(|trigger| ScheduleInfo {
                expression: trigger.expression().to_string(),
                jobs: trigger.jobs().map(str::to_string).collect(),
                state: trigger.state(),
                next_fire: trigger.schedule().upcoming(),
            })
            .collect();
        infos.sort_by(|a, b| a.expression.cmp(&b.expression));
        infos
    }
}
