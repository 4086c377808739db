//! Status Stream Integration Tests
//!
//! Tests frame emission on change, suppression of redundant frames,
//! auto-close on terminal status or deletion, and the poll fallback when
//! events are lost.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;
use tokio_test::{assert_pending, assert_ready};

use backtest_scheduler::{
    BacktestRequest, BacktestScheduler, BroadcastConfig, InMemoryJobStore, JobEventHub, JobId,
    JobStatus, RunHandle, SchedulerError, SchedulerSettings, ScriptedEngine, StatusPublisher,
};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    scheduler: Arc<BacktestScheduler>,
    engine: Arc<ScriptedEngine>,
    publisher: StatusPublisher,
}

fn harness(max_concurrent: usize, poll: Duration, event_capacity: usize) -> Harness {
    let engine = Arc::new(ScriptedEngine::new());
    let (scheduler, _) = BacktestScheduler::new(
        SchedulerSettings {
            max_concurrent,
            ..SchedulerSettings::default()
        },
        Arc::new(InMemoryJobStore::new()),
        engine.clone(),
        Arc::new(JobEventHub::new(BroadcastConfig {
            job_events_capacity: event_capacity,
        })),
    );
    let publisher = StatusPublisher::new(Arc::clone(&scheduler), poll);
    Harness {
        scheduler,
        engine,
        publisher,
    }
}

async fn next_run(engine: &ScriptedEngine) -> RunHandle {
    timeout(WAIT, engine.next_run()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_frames_follow_progress_and_close_on_completion() {
    let h = harness(1, Duration::from_millis(20), 64);
    let id = h.scheduler.submit(BacktestRequest::default()).unwrap().id;
    let run = next_run(&h.engine).await;

    let mut stream = pin!(h.publisher.stream(&id).unwrap());
    let first = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Running);
    assert!(first.progress.abs() < f64::EPSILON);

    run.report(10.0);
    let frame = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert!((frame.progress - 10.0).abs() < f64::EPSILON);

    // Same value again: no frame within several poll intervals.
    run.report(10.0);
    assert!(
        timeout(Duration::from_millis(100), stream.next())
            .await
            .is_err()
    );

    run.report(55.0);
    let frame = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert!((frame.progress - 55.0).abs() < f64::EPSILON);

    run.complete();
    let last = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert!(last.result.is_some());

    assert!(timeout(WAIT, stream.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_progress_event_wakes_stream() {
    // Long poll interval: only the job event can wake the stream.
    let h = harness(1, Duration::from_secs(60), 64);
    let id = h.scheduler.submit(BacktestRequest::default()).unwrap().id;
    let run = next_run(&h.engine).await;

    let mut stream = tokio_test::task::spawn(h.publisher.stream(&id).unwrap());
    let first = assert_ready!(stream.poll_next()).unwrap();
    assert_eq!(first.status, JobStatus::Running);
    assert_pending!(stream.poll_next());

    run.report(30.0);
    assert!(stream.is_woken());
    let frame = assert_ready!(stream.poll_next()).unwrap();
    assert!((frame.progress - 30.0).abs() < f64::EPSILON);
    assert_pending!(stream.poll_next());

    run.complete();
}

#[tokio::test]
async fn test_queued_job_streams_promotion() {
    let h = harness(1, Duration::from_millis(20), 64);
    let _first = h.scheduler.submit(BacktestRequest::default()).unwrap();
    let queued = h.scheduler.submit(BacktestRequest::default()).unwrap().id;
    let run_first = next_run(&h.engine).await;

    let mut stream = pin!(h.publisher.stream(&queued).unwrap());
    let frame = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(frame.status, JobStatus::Queued);

    run_first.complete();
    let frame = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(frame.status, JobStatus::Running);

    next_run(&h.engine).await.fail("bad data");
    let frame = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(frame.status, JobStatus::Failed);
    assert_eq!(frame.error.as_deref(), Some("bad data"));
    assert!(timeout(WAIT, stream.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_closes_stream_with_cancelled_frame() {
    let h = harness(1, Duration::from_millis(20), 64);
    let id = h.scheduler.submit(BacktestRequest::default()).unwrap().id;
    let _run = next_run(&h.engine).await;

    let mut stream = pin!(h.publisher.stream(&id).unwrap());
    timeout(WAIT, stream.next()).await.unwrap().unwrap();

    h.scheduler.cancel(&id).unwrap();
    let frame = timeout(WAIT, stream.next()).await.unwrap().unwrap();
    assert_eq!(frame.status, JobStatus::Cancelled);
    assert!(timeout(WAIT, stream.next()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_deleted_job_ends_stream() {
    let h = harness(1, Duration::from_millis(20), 64);
    let id = h.scheduler.submit(BacktestRequest::default()).unwrap().id;
    let _run = next_run(&h.engine).await;

    let mut stream = pin!(h.publisher.stream(&id).unwrap());
    timeout(WAIT, stream.next()).await.unwrap().unwrap();

    h.scheduler.delete(&id).unwrap();
    let rest: Vec<_> = timeout(WAIT, stream.collect::<Vec<_>>()).await.unwrap();
    assert!(rest.len() <= 1);
    assert!(rest.iter().all(|r| r.status == JobStatus::Cancelled));
}

#[tokio::test]
async fn test_terminal_job_streams_single_frame() {
    let h = harness(1, Duration::from_millis(20), 64);
    let id = h.scheduler.submit(BacktestRequest::default()).unwrap().id;
    next_run(&h.engine).await.complete();
    timeout(WAIT, async {
        while h.scheduler.get(&id).unwrap().status != JobStatus::Completed {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let frames: Vec<_> = timeout(WAIT, h.publisher.stream(&id).unwrap().collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].status, JobStatus::Completed);
}

#[tokio::test]
async fn test_unknown_job_cannot_be_streamed() {
    let h = harness(1, Duration::from_millis(20), 64);
    assert!(matches!(
        h.publisher.stream(&JobId::new("bt_nope")),
        Err(SchedulerError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_lagged_stream_recovers_through_polling() {
    // Capacity 1 forces lag; frames must still be monotonic and end terminal.
    let h = harness(1, Duration::from_millis(10), 1);
    let id = h.scheduler.submit(BacktestRequest::default()).unwrap().id;
    let run = next_run(&h.engine).await;

    let stream = h.publisher.stream(&id).unwrap();
    let collector = tokio::spawn(stream.collect::<Vec<_>>());

    for step in 1..=100 {
        run.report(f64::from(step));
    }
    run.complete();

    let frames = timeout(WAIT, collector).await.unwrap().unwrap();
    assert!(frames.len() >= 2);
    assert!(frames.windows(2).all(|w| w[0].progress <= w[1].progress));
    let last = frames.last().unwrap();
    assert_eq!(last.status, JobStatus::Completed);
    assert!((last.progress - 100.0).abs() < f64::EPSILON);
}
