//! Integration tests for task queue threads and merge routing
//!
//! These tests verify that:
//! - Each queue thread reports its own queue as current
//! - Tasks posted to a subsumed queue run on the owner's thread
//! - Unmerging hands the subsumed queue back to its own thread

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use blinc_task_queue::{TaskQueueError, TaskQueueId, TaskQueueRegistry, TaskQueueThread, TaskQueues};
use crossbeam_channel::bounded;
use pretty_assertions::assert_eq;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Post a task that reports the thread name and current queue it ran on
fn current_queue_on(target: &TaskQueueThread) -> (String, Option<TaskQueueId>) {
    let (tx, rx) = bounded(1);
    let queues = target.queues().clone();
    target
        .post_task(move || {
            let name = thread::current().name().unwrap_or_default().to_string();
            tx.send((name, queues.current_task_queue_id())).unwrap();
        })
        .unwrap();
    rx.recv_timeout(TIMEOUT).expect("reporting task never ran")
}

#[test]
fn test_threads_run_their_own_queues() {
    let queues = Arc::new(TaskQueues::new());
    let platform = TaskQueueThread::spawn("platform", queues.clone()).unwrap();
    let raster = TaskQueueThread::spawn("raster", queues.clone()).unwrap();

    assert_eq!(
        current_queue_on(&platform),
        ("platform".to_string(), Some(platform.queue_id()))
    );
    assert_eq!(
        current_queue_on(&raster),
        ("raster".to_string(), Some(raster.queue_id()))
    );
}

#[test]
fn test_merged_raster_tasks_run_on_platform_thread() {
    let queues = Arc::new(TaskQueues::new());
    let platform = TaskQueueThread::spawn("platform", queues.clone()).unwrap();
    let raster = TaskQueueThread::spawn("raster", queues.clone()).unwrap();

    queues.merge(platform.queue_id(), raster.queue_id()).unwrap();
    let (name, current) = current_queue_on(&raster);
    assert_eq!(name, "platform");
    assert_eq!(current, Some(platform.queue_id()));

    queues.unmerge(platform.queue_id()).unwrap();
    let (name, current) = current_queue_on(&raster);
    assert_eq!(name, "raster");
    assert_eq!(current, Some(raster.queue_id()));
}

#[test]
fn test_join_stops_thread_and_rejects_tasks() {
    let queues = Arc::new(TaskQueues::new());
    let worker = TaskQueueThread::spawn("worker", queues.clone()).unwrap();
    let queue_id = worker.queue_id();

    worker.join().unwrap();

    assert!(matches!(
        queues.post_task(queue_id, Box::new(|| {})),
        Err(TaskQueueError::UnknownQueue(_))
    ));
}

#[test]
fn test_join_survives_queue_disposed_elsewhere() {
    let queues = Arc::new(TaskQueues::new());
    let worker = TaskQueueThread::spawn("orphaned", queues.clone()).unwrap();
    let queue_id = worker.queue_id();

    // Disposing the queue out from under the thread stops it; join still
    // completes and only logs the failed dispose.
    queues.dispose_task_queue(queue_id).unwrap();
    worker.join().unwrap();

    assert!(matches!(
        queues.dispose_task_queue(queue_id),
        Err(TaskQueueError::UnknownQueue(_))
    ));
}

#[test]
fn test_panicking_task_is_reported_on_join() {
    let queues = Arc::new(TaskQueues::new());
    let worker = TaskQueueThread::spawn("doomed", queues.clone()).unwrap();
    let (tx, rx) = bounded::<()>(1);

    worker
        .post_task(move || {
            let _tx = tx;
            panic!("task failure");
        })
        .unwrap();
    // The sender is dropped while the task unwinds.
    let _ = rx.recv_timeout(TIMEOUT);

    assert!(matches!(worker.join(), Err(TaskQueueError::Panicked(name)) if name == "doomed"));
}
