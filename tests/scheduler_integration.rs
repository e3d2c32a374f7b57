//! Integration tests for the job scheduler.
//!
//! Jobs are closure-backed `FnJob`s that record each run, so the tests can
//! assert exactly which jobs executed and in what order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::time::timeout;

use feed_pipeline::config::SchedulerConfig;
use feed_pipeline::error::{JobError, SchedulerError};
use feed_pipeline::scheduler::{FnJob, Job, JobResult, JobScheduler, TriggerState};

const HOURLY: &str = "0 * * * *";
const EVERY_MINUTE: &str = "* * * * *";

/// Maximum time any test is allowed to wait before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared record of job executions, in order.
#[derive(Clone, Default)]
struct RunLog(Arc<Mutex<Vec<String>>>);

impl RunLog {
    fn runs(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, name: &str) -> usize {
        self.runs().iter().filter(|n| *n == name).count()
    }

    fn job(&self, name: &str, deps: &[&str]) -> Arc<dyn Job> {
        self.job_with(name, deps, None)
    }

    fn failing(&self, name: &str, deps: &[&str], error: &str) -> Arc<dyn Job> {
        self.job_with(name, deps, Some(error.to_string()))
    }

    fn job_with(&self, name: &str, deps: &[&str], error: Option<String>) -> Arc<dyn Job> {
        let log = self.clone();
        let label = name.to_string();
        Arc::new(
            FnJob::new(name, move || {
                let log = log.clone();
                let label = label.clone();
                let error = error.clone();
                async move {
                    log.0.lock().unwrap().push(label);
                    match error {
                        Some(message) => Err(JobError::failed(message)),
                        None => Ok(()),
                    }
                }
            })
            .with_dependencies(deps.iter().copied()),
        )
    }
}

fn scheduler() -> Arc<JobScheduler> {
    JobScheduler::new(SchedulerConfig::default())
}

/// Register with dependency validation on.
async fn add(s: &Arc<JobScheduler>, job: Arc<dyn Job>, expression: &str) {
    s.register_job(job, expression, true).await.unwrap();
}

fn by_name(results: &[JobResult]) -> HashMap<&str, &JobResult> {
    results.iter().map(|r| (r.job_name.as_str(), r)).collect()
}

#[tokio::test]
async fn cycle_is_rejected_before_registration() {
    let log = RunLog::default();
    let s = scheduler();
    add(&s, log.job("a", &[]), HOURLY).await;
    add(&s, log.job("b", &["a"]), HOURLY).await;
    add(&s, log.job("c", &["b"]), HOURLY).await;

    // With validation on, a cycle can only be closed by a job whose
    // dependencies already exist: bring "a" back depending on "c".
    s.remove_job("a").await.unwrap();
    let err = s
        .register_job(log.job("a", &["c"]), HOURLY, true)
        .await
        .unwrap_err();

    match err {
        SchedulerError::CircularDependency { cycle, .. } => {
            assert_eq!(cycle.first(), cycle.last());
            assert!(cycle.contains(&"a".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(s.job_names().await, vec!["b", "c"]);
    assert!(s.validate_graph().await.is_err(), "b still points at the removed a");
}

#[tokio::test]
async fn missing_dependency_is_rejected() {
    let log = RunLog::default();
    let s = scheduler();
    let err = s
        .register_job(log.job("x", &["ghost"]), HOURLY, true)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SchedulerError::DependencyNotFound { ref job, ref dependency }
            if job == "x" && dependency == "ghost"
    ));
    assert_eq!(s.job_count().await, 0);
    assert_eq!(s.trigger_count().await, 0);
}

#[tokio::test]
async fn resolved_order_puts_dependencies_first() {
    let log = RunLog::default();
    let s = scheduler();
    add(&s, log.job("fetch", &[]), HOURLY).await;
    add(&s, log.job("parse", &["fetch"]), HOURLY).await;
    add(&s, log.job("images", &["fetch"]), "*/30 * * * *").await;
    add(&s, log.job("analyze", &["parse", "images"]), HOURLY).await;
    add(&s, log.job("social", &["analyze", "parse"]), "0 6 * * *").await;

    let order = s.resolve_order().await.unwrap();
    assert_eq!(order.len(), 5);
    let pos = |n: &str| order.iter().position(|o| o == n).unwrap();
    for (job, deps) in [
        ("parse", vec!["fetch"]),
        ("images", vec!["fetch"]),
        ("analyze", vec!["parse", "images"]),
        ("social", vec!["analyze", "parse"]),
    ] {
        for dep in deps {
            assert!(pos(dep) < pos(job), "{dep} should precede {job}");
        }
    }

    let results = s.execute_round().await;
    let executed: Vec<&str> = results.iter().map(|r| r.job_name.as_str()).collect();
    assert_eq!(executed, order);
    assert_eq!(log.runs(), order);
}

#[tokio::test]
async fn failure_cascades_to_transitive_dependents() {
    let log = RunLog::default();
    let s = scheduler();
    add(&s, log.failing("a", &[], "feed timeout"), HOURLY).await;
    add(&s, log.job("b", &["a"]), HOURLY).await;
    add(&s, log.job("c", &["b"]), HOURLY).await;

    let results = s.execute_round().await;
    let r = by_name(&results);

    assert!(!r["a"].success);
    assert!(r["a"].dependencies_met);
    assert_eq!(r["a"].error.as_deref(), Some("feed timeout"));

    for name in ["b", "c"] {
        assert!(!r[name].success);
        assert!(!r[name].dependencies_met);
        assert_eq!(r[name].execution_time_ms, 0);
        assert!(r[name].error.is_none());
    }
    let c_reason = r["c"].skipped_reason.as_deref().unwrap();
    assert!(c_reason.contains("'b'"));
    assert!(!c_reason.contains("'a'"));

    assert_eq!(log.runs(), vec!["a"]);
}

#[tokio::test]
async fn unrelated_jobs_still_run() {
    let log = RunLog::default();
    let s = scheduler();
    add(&s, log.failing("a", &[], "boom"), HOURLY).await;
    add(&s, log.job("d", &[]), HOURLY).await;

    let results = s.execute_round().await;
    let r = by_name(&results);
    assert!(!r["a"].success);
    assert!(r["d"].success);
    assert!(r["d"].message.is_some());
    assert_eq!(log.count("d"), 1);
}

#[tokio::test]
async fn shared_expression_shares_one_trigger() {
    let log = RunLog::default();
    let s = scheduler();
    add(&s, log.job("parse", &[]), HOURLY).await;
    add(&s, log.job("analyze", &["parse"]), HOURLY).await;
    add(&s, log.job("digest", &[]), "0 6 * * *").await;

    assert_eq!(s.trigger_count().await, 2);

    let results = s.fire_schedule(HOURLY).await.unwrap();
    assert_eq!(s.rounds_completed(), 1);
    // One round, covering every registered job, each exactly once.
    assert_eq!(results.len(), 3);
    for name in ["parse", "analyze", "digest"] {
        assert_eq!(log.count(name), 1);
    }
}

#[tokio::test]
async fn concurrent_round_is_refused() {
    let s = scheduler();
    let release = Arc::new(Notify::new());
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let runs = RunLog::default();

    let gate = Arc::clone(&release);
    let record = runs.clone();
    s.register_job(
        Arc::new(FnJob::new("slow", move || {
            let gate = Arc::clone(&gate);
            let started = started_tx.clone();
            let record = record.clone();
            async move {
                record.0.lock().unwrap().push("slow".to_string());
                let _ = started.send(());
                gate.notified().await;
                Ok(())
            }
        })),
        HOURLY,
        true,
    )
    .await
    .unwrap();

    let first = tokio::spawn({
        let s = Arc::clone(&s);
        async move { s.execute_round().await }
    });

    timeout(TEST_TIMEOUT, started_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(s.is_executing());

    let second = s.execute_round().await;
    assert!(second.is_empty());
    assert!(s.fire_schedule(HOURLY).await.unwrap().is_empty());

    release.notify_one();
    let first = timeout(TEST_TIMEOUT, first).await.unwrap();
    let first = first.unwrap();
    assert_eq!(first.len(), 1);
    assert!(first[0].success);
    assert_eq!(runs.count("slow"), 1);
    assert!(!s.is_executing());
    assert_eq!(s.rounds_completed(), 1);
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let log = RunLog::default();
    let s = scheduler();
    add(&s, log.job("parse", &[]), "0 0 1 1 *").await;
    add(&s, log.job("digest", &[]), "0 0 2 1 *").await;

    s.start().await;
    s.start().await;
    assert!(s.is_started());
    assert!(s.schedules().await.iter().all(|i| i.state == TriggerState::Started));

    s.stop().await;
    s.stop().await;
    assert!(!s.is_started());
    assert!(s.schedules().await.iter().all(|i| i.state == TriggerState::Stopped));

    s.start().await;
    assert!(s.schedules().await.iter().all(|i| i.state == TriggerState::Started));
    s.stop().await;
}

#[tokio::test]
async fn parse_analyze_social_scenario() {
    let log = RunLog::default();
    let s = scheduler();
    add(&s, log.job("parse", &[]), HOURLY).await;
    add(&s, log.failing("analyze", &["parse"], "LLM returned 500"), HOURLY).await;
    add(&s, log.job("social", &["analyze"]), HOURLY).await;

    let results = s.execute_round().await;
    let r = by_name(&results);

    assert!(r["parse"].success);
    assert!(!r["analyze"].success);
    assert!(r["analyze"].error.as_deref().unwrap().contains("LLM returned 500"));
    assert!(!r["social"].success);
    assert!(!r["social"].dependencies_met);
    assert!(r["social"].skipped_reason.as_deref().unwrap().contains("analyze"));
}

#[tokio::test]
async fn completion_does_not_carry_across_rounds() {
    let log = RunLog::default();
    let s = scheduler();
    let flaky_runs = Arc::new(Mutex::new(0u32));

    let counter = Arc::clone(&flaky_runs);
    s.register_job(
        Arc::new(FnJob::new("parse", move || {
            let counter = Arc::clone(&counter);
            async move {
                let mut n = counter.lock().unwrap();
                *n += 1;
                if *n == 1 {
                    Ok(())
                } else {
                    Err(JobError::failed("second run fails"))
                }
            }
        })),
        HOURLY,
        true,
    )
    .await
    .unwrap();
    add(&s, log.job("analyze", &["parse"]), HOURLY).await;

    let first = s.execute_round().await;
    assert!(first.iter().all(|r| r.success));

    let second = s.execute_round().await;
    let r = by_name(&second);
    assert!(!r["parse"].success);
    assert!(!r["analyze"].dependencies_met);
    assert_eq!(log.count("analyze"), 1);
}

#[tokio::test]
async fn stop_does_not_cancel_in_flight_round() {
    let s = scheduler();
    let release = Arc::new(Notify::new());
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();

    let gate = Arc::clone(&release);
    s.register_job(
        Arc::new(FnJob::new("long", move || {
            let gate = Arc::clone(&gate);
            let started = started_tx.clone();
            async move {
                let _ = started.send(());
                gate.notified().await;
                Ok(())
            }
        })),
        HOURLY,
        true,
    )
    .await
    .unwrap();
    s.start().await;

    let round = tokio::spawn({
        let s = Arc::clone(&s);
        async move { s.execute_round().await }
    });
    timeout(TEST_TIMEOUT, started_rx.recv())
        .await
        .unwrap()
        .unwrap();

    s.stop().await;
    release.notify_one();

    let results = timeout(TEST_TIMEOUT, round).await.unwrap();
    let results = results.unwrap();
    assert!(results[0].success);
}

#[tokio::test]
async fn immediate_execution_runs_then_arms() {
    let log = RunLog::default();
    let s = scheduler();
    add(&s, log.job("parse", &[]), HOURLY).await;

    let results = s.start_with_immediate_execution().await;
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert!(s.is_started());
    assert_eq!(s.schedules().await[0].state, TriggerState::Started);
    s.stop().await;
}

#[tokio::test(start_paused = true)]
async fn armed_trigger_fires_a_round() {
    let s = scheduler();
    let (tx, mut rx) = mpsc::unbounded_channel();
    s.register_job(
        Arc::new(FnJob::new("tick", move || {
            let tx = tx.clone();
            async move {
                let _ = tx.send("tick");
                Ok(())
            }
        })),
        EVERY_MINUTE,
        true,
    )
    .await
    .unwrap();

    s.start().await;
    // Virtual time: the runtime jumps straight to the next minute boundary.
    let fired = timeout(Duration::from_secs(120), rx.recv()).await.unwrap();
    assert_eq!(fired, Some("tick"));
    s.stop().await;
}

/// Wait (in virtual time) until the scheduler has completed `rounds` rounds.
async fn wait_for_rounds(s: &JobScheduler, rounds: u64) {
    timeout(Duration::from_secs(600), async {
        while s.rounds_completed() < rounds {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn shared_trigger_runs_one_round_per_tick() {
    let log = RunLog::default();
    let s = scheduler();
    add(&s, log.job("parse", &[]), EVERY_MINUTE).await;
    add(&s, log.job("analyze", &["parse"]), EVERY_MINUTE).await;
    assert_eq!(s.trigger_count().await, 1);

    s.start().await;
    wait_for_rounds(&s, 1).await;
    assert_eq!(s.rounds_completed(), 1);
    assert_eq!(log.runs(), vec!["parse", "analyze"]);

    // Still inside the same minute: nothing else fires.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(s.rounds_completed(), 1);

    wait_for_rounds(&s, 2).await;
    s.stop().await;
    assert_eq!(s.rounds_completed(), 2);
    assert_eq!(log.count("parse"), 2);
    assert_eq!(log.count("analyze"), 2);
}

#[tokio::test(start_paused = true)]
async fn tick_during_running_round_is_dropped() {
    let s = scheduler();
    let release = Arc::new(Notify::new());
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let invocations = Arc::new(AtomicUsize::new(0));

    let gate = Arc::clone(&release);
    let calls = Arc::clone(&invocations);
    add(
        &s,
        Arc::new(FnJob::new("ingest", move || {
            let gate = Arc::clone(&gate);
            let started = started_tx.clone();
            let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                if first {
                    let _ = started.send(());
                    gate.notified().await;
                }
                Ok(())
            }
        })),
        EVERY_MINUTE,
    )
    .await;

    s.start().await;
    timeout(Duration::from_secs(120), started_rx.recv())
        .await
        .unwrap()
        .unwrap();

    // Ninety seconds later the next tick has come and gone while the first
    // round was still blocked.
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert!(s.is_executing());
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(s.rounds_completed(), 0);

    release.notify_one();
    wait_for_rounds(&s, 1).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    // The trigger survives the dropped tick and fires again on schedule.
    wait_for_rounds(&s, 2).await;
    s.stop().await;
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn round_start_delay_is_applied() {
    let log = RunLog::default();
    let s = JobScheduler::new(SchedulerConfig {
        round_start_delay: Duration::from_millis(20),
        ..SchedulerConfig::default()
    });
    add(&s, log.job("parse", &[]), HOURLY).await;

    let started = std::time::Instant::now();
    let results = s.execute_round().await;
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert!(results[0].success);
}
