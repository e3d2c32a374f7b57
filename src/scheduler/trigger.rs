//! Cron triggers, one per distinct cron expression.
//!
//! Every job registered under the same expression shares a single trigger,
//! so a tick fires exactly one execution round no matter how many jobs are
//! attached to it. The round itself always covers every registered job.

use std::collections::BTreeSet;
use std::sync::Weak;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::scheduler::JobScheduler;
use crate::scheduler::schedule::CronSchedule;

/// Lifecycle of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    Created,
    Started,
    Stopped,
}

impl std::fmt::Display for TriggerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerState::Created => write!(f, "created"),
            TriggerState::Started => write!(f, "started"),
            TriggerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// A schedule group: one cron expression and the jobs registered under it.
pub struct CronTrigger {
    schedule: CronSchedule,
    jobs: BTreeSet<String>,
    state: TriggerState,
    ticker: Option<JoinHandle<()>>,
}

impl CronTrigger {
    pub fn new(schedule: CronSchedule) -> Self {
        Self {
            schedule,
            jobs: BTreeSet::new(),
            state: TriggerState::Created,
            ticker: None,
        }
    }

    pub fn expression(&self) -> &str {
        self.schedule.expression()
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == TriggerState::Started
    }

    pub fn add_job(&mut self, name: &str) {
        self.jobs.insert(name.to_string());
    }

    /// Returns true if the job was a member.
    pub fn remove_job(&mut self, name: &str) -> bool {
        self.jobs.remove(name)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &str> {
        self.jobs.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Start ticking. No-op if already armed.
    pub fn arm(&mut self, scheduler: Weak<JobScheduler>) {
        if self.is_armed() {
            return;
        }
        let schedule = self.schedule.clone();
        self.ticker = Some(tokio::spawn(tick_loop(schedule, scheduler)));
        self.state = TriggerState::Started;
        tracing::debug!(schedule = %self.expression(), "Trigger armed");
    }

    /// Stop ticking. A round already spawned by this trigger keeps running.
    pub fn disarm(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        if self.state == TriggerState::Started {
            self.state = TriggerState::Stopped;
            tracing::debug!(schedule = %self.expression(), "Trigger disarmed");
        }
    }
}

impl Drop for CronTrigger {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

/// Sleep until each successive fire time and start a round.
///
/// Each fire time is computed from the previous one, not from "now". Wall
/// time is read once when the trigger is armed; sleeps run on tokio's clock
/// from that anchor.
async fn tick_loop(schedule: CronSchedule, handle: Weak<JobScheduler>) {
    let anchor_wall = Utc::now();
    let anchor = Instant::now();
    let mut last = anchor_wall;

    loop {
        let Some(next) = schedule.next_after(&last) else {
            tracing::warn!(
                schedule = %schedule.expression(),
                "Cron schedule has no upcoming fire time, trigger idle"
            );
            return;
        };

        let offset = (next - anchor_wall).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep_until(anchor + offset).await;
        last = next;

        let Some(scheduler) = handle.upgrade() else {
            return;
        };

        if scheduler.is_executing() {
            tracing::warn!(
                schedule = %schedule.expression(),
                "Previous round still running, dropping tick"
            );
            continue;
        }

        tracing::info!(schedule = %schedule.expression(), fire_time = %next, "Cron tick");
        tokio::spawn(async move {
            scheduler.execute_round().await;
        });
    }
}
