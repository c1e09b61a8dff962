//! Shared fixtures for thread merger integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use blinc_task_queue::{Result, TaskQueueError, TaskQueueId, TaskQueueRegistry, TaskQueues};

/// Registry that counts every merge/unmerge call it receives
///
/// Calls are forwarded to a real [`TaskQueues`]. `fail_unmerge` makes every
/// unmerge report failure without touching the queues.
pub struct CountingRegistry {
    pub queues: TaskQueues,
    merge_calls: AtomicUsize,
    unmerge_calls: AtomicUsize,
    fail_unmerge: AtomicBool,
}

impl CountingRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            queues: TaskQueues::new(),
            merge_calls: AtomicUsize::new(0),
            unmerge_calls: AtomicUsize::new(0),
            fail_unmerge: AtomicBool::new(false),
        })
    }

    pub fn queue_pair(&self) -> (TaskQueueId, TaskQueueId) {
        (
            self.queues.create_task_queue(),
            self.queues.create_task_queue(),
        )
    }

    pub fn merge_calls(&self) -> usize {
        self.merge_calls.load(Ordering::SeqCst)
    }

    pub fn unmerge_calls(&self) -> usize {
        self.unmerge_calls.load(Ordering::SeqCst)
    }

    pub fn fail_unmerges(&self) {
        self.fail_unmerge.store(true, Ordering::SeqCst);
    }
}

impl TaskQueueRegistry for CountingRegistry {
    fn current_task_queue_id(&self) -> Option<TaskQueueId> {
        self.queues.current_task_queue_id()
    }

    fn owns(&self, owner: TaskQueueId, subsumed: TaskQueueId) -> bool {
        self.queues.owns(owner, subsumed)
    }

    fn merge(&self, owner: TaskQueueId, subsumed: TaskQueueId) -> Result<()> {
        self.merge_calls.fetch_add(1, Ordering::SeqCst);
        self.queues.merge(owner, subsumed)
    }

    fn unmerge(&self, owner: TaskQueueId) -> Result<()> {
        self.unmerge_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_unmerge.load(Ordering::SeqCst) {
            return Err(TaskQueueError::NotMerged(owner));
        }
        self.queues.unmerge(owner)
    }
}

/// Counter bumped by a merge/unmerge callback
pub fn callback_counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    (count, move || {
        count_clone.fetch_add(1, Ordering::SeqCst);
    })
}
