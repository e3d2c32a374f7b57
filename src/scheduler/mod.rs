//! Job scheduler: dependency-aware execution rounds driven by cron triggers.
//!
//! Core components:
//! - `job`: the `Job` trait, `FnJob`, and per-round `JobResult`s
//! - `graph`: reference checks, cycle detection, topological order
//! - `engine`: runs one round in order, cascading skips past failures
//! - `schedule`: five-field UTC cron expressions
//! - `trigger`: one shared trigger per distinct cron expression
//! - `job_scheduler`: the registry that ties them together

mod engine;
pub mod graph;
pub mod job;
pub mod job_scheduler;
pub mod schedule;
pub mod trigger;

pub use graph::DependencyGraph;
pub use job::{FnJob, Job, JobResult, RoundSummary};
pub use job_scheduler::{JobScheduler, ScheduleInfo};
pub use schedule::CronSchedule;
pub use trigger::{CronTrigger, TriggerState};
