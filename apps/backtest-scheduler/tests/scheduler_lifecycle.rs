//! Scheduler Lifecycle Integration Tests
//!
//! Tests admission, FIFO promotion, cancellation, terminal immutability,
//! engine failures, timeouts, and shutdown against a scripted engine.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use backtest_scheduler::{
    BacktestRequest, BacktestScheduler, CancelOutcome, EngineError, InMemoryJobStore, JobEventHub,
    JobId, JobStatus, RunHandle, SchedulerError, SchedulerSettings, ScriptedEngine,
};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    scheduler: Arc<BacktestScheduler>,
    engine: Arc<ScriptedEngine>,
    store: Arc<InMemoryJobStore>,
}

fn harness(max_concurrent: usize) -> Harness {
    harness_with(
        SchedulerSettings {
            max_concurrent,
            ..SchedulerSettings::default()
        },
        ScriptedEngine::new(),
    )
}

fn harness_with(settings: SchedulerSettings, engine: ScriptedEngine) -> Harness {
    let engine = Arc::new(engine);
    let store = Arc::new(InMemoryJobStore::new());
    let (scheduler, _) = BacktestScheduler::new(
        settings,
        store.clone(),
        engine.clone(),
        Arc::new(JobEventHub::with_defaults()),
    );
    Harness {
        scheduler,
        engine,
        store,
    }
}

fn labelled(label: &str) -> BacktestRequest {
    BacktestRequest {
        model_name: Some(label.to_string()),
        ..BacktestRequest::default()
    }
}

async fn next_run(engine: &ScriptedEngine) -> RunHandle {
    timeout(WAIT, engine.next_run())
        .await
        .expect("engine run did not start")
        .expect("engine channel closed")
}

/// Collect `n` started runs keyed by model name.
async fn runs(engine: &ScriptedEngine, n: usize) -> HashMap<String, RunHandle> {
    let mut runs = HashMap::new();
    for _ in 0..n {
        let run = next_run(engine).await;
        runs.insert(run.config().model_name.clone(), run);
    }
    runs
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn status(scheduler: &BacktestScheduler, id: &JobId) -> JobStatus {
    scheduler.get(id).unwrap().status
}

// =============================================================================
// Admission
// =============================================================================

#[tokio::test]
async fn test_fourth_job_queues_and_is_promoted_first() {
    let h = harness(3);

    let a = h.scheduler.submit(labelled("A")).unwrap();
    let b = h.scheduler.submit(labelled("B")).unwrap();
    let c = h.scheduler.submit(labelled("C")).unwrap();
    let d = h.scheduler.submit(labelled("D")).unwrap();
    let e = h.scheduler.submit(labelled("E")).unwrap();

    for receipt in [&a, &b, &c] {
        assert_eq!(receipt.status, JobStatus::Running);
        assert_eq!(receipt.queue_position, None);
    }
    assert_eq!(d.status, JobStatus::Queued);
    assert_eq!(d.queue_position, Some(1));
    assert_eq!(e.queue_position, Some(2));

    let mut started = runs(&h.engine, 3).await;
    assert_eq!(h.scheduler.counts().running, 3);

    started.remove("B").unwrap().complete();
    wait_until(|| status(&h.scheduler, &d.id) == JobStatus::Running).await;

    assert_eq!(status(&h.scheduler, &b.id), JobStatus::Completed);
    assert_eq!(status(&h.scheduler, &e.id), JobStatus::Queued);
    assert_eq!(h.scheduler.counts().running, 3);

    let promoted = next_run(&h.engine).await;
    assert_eq!(promoted.config().model_name, "D");
}

#[tokio::test]
async fn test_running_never_exceeds_max_concurrent() {
    let h = harness(2);
    let ids: Vec<JobId> = (0..6)
        .map(|i| h.scheduler.submit(labelled(&format!("job-{i}"))).unwrap().id)
        .collect();

    for _ in 0..6 {
        assert!(h.scheduler.counts().running <= 2);
        assert!(h.scheduler.occupied_slots() <= 2);
        next_run(&h.engine).await.complete();
    }

    wait_until(|| h.scheduler.counts().completed == 6).await;
    assert_eq!(h.scheduler.occupied_slots(), 0);
    for id in &ids {
        assert_eq!(status(&h.scheduler, id), JobStatus::Completed);
    }
}

#[tokio::test]
async fn test_validation_failure_creates_no_job() {
    let h = harness(1);
    let err = h
        .scheduler
        .submit(BacktestRequest {
            symbols: Some(vec![]),
            ..BacktestRequest::default()
        })
        .unwrap_err();

    assert!(matches!(err, SchedulerError::Validation(_)));
    assert_eq!(h.scheduler.snapshot().jobs.len(), 0);
    assert_eq!(h.store.save_count(), 0);
}

// =============================================================================
// Completion
// =============================================================================

#[tokio::test]
async fn test_completed_job_has_result_and_artifact() {
    let h = harness(3);
    let receipt = h
        .scheduler
        .submit(BacktestRequest {
            symbols: Some(vec!["BTCUSDT".to_string()]),
            days: Some(7),
            initial_balance: Some(10_000.0),
            ..BacktestRequest::default()
        })
        .unwrap();
    assert_eq!(receipt.status, JobStatus::Running);

    let run = next_run(&h.engine).await;
    assert_eq!(run.config().symbols, vec!["BTCUSDT".to_string()]);
    run.report(40.0);
    run.report(100.0);
    run.complete();

    wait_until(|| status(&h.scheduler, &receipt.id) == JobStatus::Completed).await;
    let record = h.scheduler.get(&receipt.id).unwrap();
    assert!((record.progress - 100.0).abs() < f64::EPSILON);
    assert!(record.result.is_some());
    assert!(record.error.is_none());
    assert!(record.completed_at.is_some());
    assert_eq!(h.scheduler.counts().completed, 1);

    wait_until(|| h.store.artifact(&receipt.id).is_some()).await;
    let indexed = h.store.index();
    assert_eq!(indexed[0].status, JobStatus::Completed);
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let h = harness(1);
    let id = h.scheduler.submit(labelled("A")).unwrap().id;
    let run = next_run(&h.engine).await;

    run.report(30.0);
    run.report(10.0);
    assert!((h.scheduler.get(&id).unwrap().progress - 30.0).abs() < f64::EPSILON);

    run.report(250.0);
    assert!((h.scheduler.get(&id).unwrap().progress - 100.0).abs() < f64::EPSILON);
    run.complete();
}

#[tokio::test]
async fn test_engine_failure_marks_job_failed() {
    let h = harness(2);
    let failing = h.scheduler.submit(labelled("fail")).unwrap().id;
    let panicking = h.scheduler.submit(labelled("panic")).unwrap().id;

    let mut started = runs(&h.engine, 2).await;
    started.remove("fail").unwrap().fail("no candles for BTCUSDT");
    started.remove("panic").unwrap().panic("index out of bounds");

    wait_until(|| h.scheduler.counts().failed == 2).await;

    let failed = h.scheduler.get(&failing).unwrap();
    assert_eq!(failed.error.as_deref(), Some("no candles for BTCUSDT"));
    assert!(failed.result.is_none());

    let panicked = h.scheduler.get(&panicking).unwrap();
    assert!(panicked.error.unwrap().contains("index out of bounds"));

    wait_until(|| h.store.artifact_count() == 2).await;
    wait_until(|| h.scheduler.occupied_slots() == 0).await;
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_queued_job_is_immediate_and_never_promoted() {
    let h = harness(1);
    let a = h.scheduler.submit(labelled("A")).unwrap().id;
    let b = h.scheduler.submit(labelled("B")).unwrap().id;
    let run_a = next_run(&h.engine).await;

    let outcome = h.scheduler.cancel(&b).unwrap();
    assert_eq!(
        outcome,
        CancelOutcome::Cancelled {
            previous: JobStatus::Queued
        }
    );
    let cancelled = h.scheduler.get(&b).unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());
    assert_eq!(status(&h.scheduler, &a), JobStatus::Running);

    run_a.complete();
    wait_until(|| h.scheduler.occupied_slots() == 0).await;

    sleep(Duration::from_millis(20)).await;
    assert!(h.engine.try_next_run().await.is_none());
    assert_eq!(status(&h.scheduler, &b), JobStatus::Cancelled);
}

#[tokio::test]
async fn test_cancelled_running_job_holds_slot_until_engine_returns() {
    let h = harness_with(
        SchedulerSettings {
            max_concurrent: 1,
            ..SchedulerSettings::default()
        },
        ScriptedEngine::ignoring_cancel(),
    );
    let a = h.scheduler.submit(labelled("A")).unwrap().id;
    let b = h.scheduler.submit(labelled("B")).unwrap().id;
    let run_a = next_run(&h.engine).await;

    h.scheduler.cancel(&a).unwrap();
    assert_eq!(status(&h.scheduler, &a), JobStatus::Cancelled);
    assert!(run_a.cancel_token().is_cancelled());
    assert_eq!(h.scheduler.occupied_slots(), 1);
    assert_eq!(status(&h.scheduler, &b), JobStatus::Queued);

    run_a.finish_with(Err(EngineError::Cancelled));
    wait_until(|| status(&h.scheduler, &b) == JobStatus::Running).await;

    let record = h.scheduler.get(&a).unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
    assert!(record.completed_at.is_some());
    next_run(&h.engine).await.complete();
}

#[tokio::test]
async fn test_terminal_status_is_never_overwritten() {
    let h = harness_with(SchedulerSettings::default(), ScriptedEngine::ignoring_cancel());
    let id = h.scheduler.submit(labelled("A")).unwrap().id;
    let run = next_run(&h.engine).await;
    run.report(20.0);

    h.scheduler.cancel(&id).unwrap();
    let at_cancel = h.scheduler.get(&id).unwrap();

    run.report(80.0);
    run.complete();
    wait_until(|| h.scheduler.occupied_slots() == 0).await;

    let after = h.scheduler.get(&id).unwrap();
    assert_eq!(after.status, JobStatus::Cancelled);
    assert!((after.progress - 20.0).abs() < f64::EPSILON);
    assert!(after.result.is_none());
    assert_eq!(after.started_at, at_cancel.started_at);
    assert!(after.completed_at.is_some());
    assert!(h.store.artifact(&id).is_none());

    assert_eq!(
        h.scheduler.cancel(&id).unwrap(),
        CancelOutcome::AlreadyFinished(JobStatus::Cancelled)
    );
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let h = harness(1);
    let ghost = JobId::new("bt_missing");
    assert!(matches!(h.scheduler.get(&ghost), Err(SchedulerError::NotFound(_))));
    assert!(matches!(h.scheduler.cancel(&ghost), Err(SchedulerError::NotFound(_))));
    assert!(matches!(h.scheduler.delete(&ghost), Err(SchedulerError::NotFound(_))));
}

#[tokio::test]
async fn test_delete_running_job_removes_and_promotes() {
    let h = harness(1);
    let a = h.scheduler.submit(labelled("A")).unwrap().id;
    let b = h.scheduler.submit(labelled("B")).unwrap().id;
    let _run_a = next_run(&h.engine).await;

    let outcome = h.scheduler.delete(&a).unwrap();
    assert_eq!(
        outcome,
        CancelOutcome::Cancelled {
            previous: JobStatus::Running
        }
    );
    assert!(matches!(h.scheduler.get(&a), Err(SchedulerError::NotFound(_))));

    wait_until(|| status(&h.scheduler, &b) == JobStatus::Running).await;
    assert!(h.store.index().iter().all(|r| r.id != a));
    next_run(&h.engine).await.complete();
}

#[tokio::test]
async fn test_delete_finished_job_only_removes() {
    let h = harness(1);
    let id = h.scheduler.submit(labelled("A")).unwrap().id;
    next_run(&h.engine).await.complete();
    wait_until(|| status(&h.scheduler, &id) == JobStatus::Completed).await;

    assert_eq!(
        h.scheduler.delete(&id).unwrap(),
        CancelOutcome::AlreadyFinished(JobStatus::Completed)
    );
    assert!(h.scheduler.snapshot().jobs.is_empty());
}

// =============================================================================
// Timeout and Shutdown
// =============================================================================

#[tokio::test]
async fn test_job_timeout_cancels_running_job() {
    let h = harness_with(
        SchedulerSettings {
            max_concurrent: 1,
            job_timeout: Some(Duration::from_millis(50)),
            ..SchedulerSettings::default()
        },
        ScriptedEngine::new(),
    );
    let id = h.scheduler.submit(labelled("slow")).unwrap().id;
    let _run = next_run(&h.engine).await;

    wait_until(|| h.scheduler.occupied_slots() == 0).await;
    let record = h.scheduler.get(&id).unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
    assert!(record.completed_at.is_some());
}

#[tokio::test]
async fn test_finished_job_is_not_cancelled_by_timeout() {
    let h = harness_with(
        SchedulerSettings {
            max_concurrent: 1,
            job_timeout: Some(Duration::from_millis(40)),
            ..SchedulerSettings::default()
        },
        ScriptedEngine::new(),
    );
    let id = h.scheduler.submit(labelled("quick")).unwrap().id;
    next_run(&h.engine).await.complete();

    wait_until(|| status(&h.scheduler, &id) == JobStatus::Completed).await;
    sleep(Duration::from_millis(80)).await;
    assert_eq!(status(&h.scheduler, &id), JobStatus::Completed);
}

#[tokio::test]
async fn test_shutdown_rejects_new_jobs_and_drains() {
    let h = harness(1);
    let running = h.scheduler.submit(labelled("A")).unwrap().id;
    let queued = h.scheduler.submit(labelled("B")).unwrap().id;
    let _run = next_run(&h.engine).await;

    h.scheduler.shutdown();
    assert!(!h.scheduler.is_accepting());
    assert!(matches!(
        h.scheduler.submit(labelled("C")),
        Err(SchedulerError::ShuttingDown)
    ));

    timeout(WAIT, h.scheduler.wait_idle()).await.unwrap();
    assert_eq!(status(&h.scheduler, &running), JobStatus::Cancelled);
    assert_eq!(status(&h.scheduler, &queued), JobStatus::Cancelled);
    assert!(h.store.index().iter().all(|r| r.status.is_terminal()));
}

#[tokio::test]
async fn test_save_failures_do_not_block_scheduling() {
    let h = harness(1);
    h.store.set_fail_saves(true);

    let id = h.scheduler.submit(labelled("A")).unwrap().id;
    next_run(&h.engine).await.complete();
    wait_until(|| status(&h.scheduler, &id) == JobStatus::Completed).await;

    assert_eq!(h.store.save_count(), 0);
    assert!(h.store.index().is_empty());
}
