//! In-process task queue registry
//!
//! [`TaskQueues`] owns every queue's pending tasks and the merge links between
//! queues. A single mutex guards all of it; queue threads park on one condvar
//! and are woken whenever a task is posted or the merge topology changes.

use std::cell::Cell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use slotmap::SlotMap;
use tracing::{debug, trace};

use crate::registry::TaskQueueRegistry;
use crate::{Result, TaskQueueError, TaskQueueId};

/// A unit of work posted to a task queue
pub type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static CURRENT_QUEUE: Cell<Option<TaskQueueId>> = const { Cell::new(None) };
}

/// Queue bound to the calling thread, if any
pub fn current_task_queue_id() -> Option<TaskQueueId> {
    CURRENT_QUEUE.with(|current| current.get())
}

/// Binds a queue to the current thread until dropped
///
/// Restores the previous binding on drop, so guards may nest.
pub struct CurrentQueueGuard {
    previous: Option<TaskQueueId>,
    // Thread-local bindings must be released on the thread that made them.
    _not_send: PhantomData<*const ()>,
}

impl CurrentQueueGuard {
    pub(crate) fn bind(queue_id: TaskQueueId) -> Self {
        let previous = CURRENT_QUEUE.with(|current| current.replace(Some(queue_id)));
        Self {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for CurrentQueueGuard {
    fn drop(&mut self) {
        CURRENT_QUEUE.with(|current| current.set(self.previous));
    }
}

struct QueueEntry {
    tasks: VecDeque<Task>,
    /// Queue whose tasks this queue's thread also runs
    subsumed: Option<TaskQueueId>,
    /// Queue whose thread currently runs this queue's tasks
    owner: Option<TaskQueueId>,
    terminated: bool,
}

impl QueueEntry {
    fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
            subsumed: None,
            owner: None,
            terminated: false,
        }
    }
}

/// Registry of task queues with merge-aware task routing
pub struct TaskQueues {
    entries: Mutex<SlotMap<TaskQueueId, QueueEntry>>,
    task_available: Condvar,
    merges: AtomicUsize,
    unmerges: AtomicUsize,
}

impl TaskQueues {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(SlotMap::with_key()),
            task_available: Condvar::new(),
            merges: AtomicUsize::new(0),
            unmerges: AtomicUsize::new(0),
        }
    }

    /// Create a new, unmerged task queue
    pub fn create_task_queue(&self) -> TaskQueueId {
        let queue_id = self.entries.lock().insert(QueueEntry::new());
        trace!(?queue_id, "created task queue");
        queue_id
    }

    /// Remove a queue, breaking any merge it takes part in
    ///
    /// Pending tasks are dropped without running.
    pub fn dispose_task_queue(&self, queue_id: TaskQueueId) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .remove(queue_id)
            .ok_or(TaskQueueError::UnknownQueue(queue_id))?;

        if let Some(subsumed) = entry.subsumed {
            if let Some(subsumed_entry) = entries.get_mut(subsumed) {
                subsumed_entry.owner = None;
            }
        }
        if let Some(owner) = entry.owner {
            if let Some(owner_entry) = entries.get_mut(owner) {
                owner_entry.subsumed = None;
            }
        }
        drop(entries);

        debug!(
            ?queue_id,
            dropped_tasks = entry.tasks.len(),
            "disposed task queue"
        );
        self.task_available.notify_all();
        Ok(())
    }

    /// Bind `queue_id` to the calling thread
    pub fn bind_current_thread(&self, queue_id: TaskQueueId) -> Result<CurrentQueueGuard> {
        if !self.entries.lock().contains_key(queue_id) {
            return Err(TaskQueueError::UnknownQueue(queue_id));
        }
        Ok(CurrentQueueGuard::bind(queue_id))
    }

    /// Post a task to a queue
    ///
    /// If the queue is currently subsumed, the owner's thread runs it.
    pub fn post_task(&self, queue_id: TaskQueueId, task: Task) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(queue_id)
            .ok_or(TaskQueueError::UnknownQueue(queue_id))?;
        if entry.terminated {
            return Err(TaskQueueError::Terminated(queue_id));
        }
        entry.tasks.push_back(task);
        drop(entries);

        self.task_available.notify_all();
        Ok(())
    }

    /// Number of tasks waiting in `queue_id` itself (not its subsumed queue)
    pub fn pending_task_count(&self, queue_id: TaskQueueId) -> usize {
        self.entries
            .lock()
            .get(queue_id)
            .map_or(0, |entry| entry.tasks.len())
    }

    /// Run every task that the thread serving `queue_id` may run right now.
    ///
    /// Returns the number of tasks executed. Tasks run without the registry
    /// lock held, so they may post further tasks.
    pub fn run_pending_tasks(&self, queue_id: TaskQueueId) -> usize {
        let mut ran = 0;
        loop {
            let next = Self::next_task_locked(&mut self.entries.lock(), queue_id);
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Block until the thread serving `queue_id` has a task to run.
    ///
    /// Returns `None` once the queue is terminated or disposed.
    pub(crate) fn wait_for_task(&self, queue_id: TaskQueueId) -> Option<Task> {
        let mut entries = self.entries.lock();
        loop {
            match entries.get(queue_id) {
                None => return None,
                Some(entry) if entry.terminated => return None,
                Some(_) => {}
            }
            if let Some(task) = Self::next_task_locked(&mut entries, queue_id) {
                return Some(task);
            }
            self.task_available.wait(&mut entries);
        }
    }

    /// Stop a queue's thread; pending tasks are discarded
    pub(crate) fn terminate(&self, queue_id: TaskQueueId) {
        if let Some(entry) = self.entries.lock().get_mut(queue_id) {
            entry.terminated = true;
            entry.tasks.clear();
        }
        self.task_available.notify_all();
    }

    /// Successful merges performed so far
    pub fn merge_count(&self) -> usize {
        self.merges.load(Ordering::Acquire)
    }

    /// Successful unmerges performed so far
    pub fn unmerge_count(&self) -> usize {
        self.unmerges.load(Ordering::Acquire)
    }

    fn next_task_locked(
        entries: &mut SlotMap<TaskQueueId, QueueEntry>,
        queue_id: TaskQueueId,
    ) -> Option<Task> {
        let entry = entries.get_mut(queue_id)?;
        // A subsumed queue's tasks belong to its owner's thread.
        if entry.owner.is_some() {
            return None;
        }
        if let Some(task) = entry.tasks.pop_front() {
            return Some(task);
        }
        let subsumed = entry.subsumed?;
        entries.get_mut(subsumed)?.tasks.pop_front()
    }
}

impl Default for TaskQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueueRegistry for TaskQueues {
    fn current_task_queue_id(&self) -> Option<TaskQueueId> {
        current_task_queue_id()
    }

    fn owns(&self, owner: TaskQueueId, subsumed: TaskQueueId) -> bool {
        if owner == subsumed {
            return true;
        }
        self.entries
            .lock()
            .get(owner)
            .is_some_and(|entry| entry.subsumed == Some(subsumed))
    }

    fn merge(&self, owner: TaskQueueId, subsumed: TaskQueueId) -> Result<()> {
        if owner == subsumed {
            return Ok(());
        }

        let mut entries = self.entries.lock();
        let (owner_owner, owner_subsumed) = entries
            .get(owner)
            .map(|entry| (entry.owner, entry.subsumed))
            .ok_or(TaskQueueError::UnknownQueue(owner))?;
        let (subsumed_owner, subsumed_subsumed) = entries
            .get(subsumed)
            .map(|entry| (entry.owner, entry.subsumed))
            .ok_or(TaskQueueError::UnknownQueue(subsumed))?;

        if owner_subsumed == Some(subsumed) {
            return Ok(());
        }
        if let Some(by) = owner_owner {
            return Err(TaskQueueError::OwnerIsSubsumed { owner, by });
        }
        if let Some(current) = owner_subsumed {
            return Err(TaskQueueError::AlreadyOwner {
                owner,
                subsumed: current,
            });
        }
        if let Some(current_owner) = subsumed_owner {
            return Err(TaskQueueError::AlreadySubsumed {
                queue: subsumed,
                owner: current_owner,
            });
        }
        if let Some(inner) = subsumed_subsumed {
            return Err(TaskQueueError::SubsumedIsOwner {
                queue: subsumed,
                subsumed: inner,
            });
        }

        if let Some(entry) = entries.get_mut(owner) {
            entry.subsumed = Some(subsumed);
        }
        if let Some(entry) = entries.get_mut(subsumed) {
            entry.owner = Some(owner);
        }
        drop(entries);

        self.merges.fetch_add(1, Ordering::AcqRel);
        debug!(?owner, ?subsumed, "merged task queues");
        self.task_available.notify_all();
        Ok(())
    }

    fn unmerge(&self, owner: TaskQueueId) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(owner)
            .ok_or(TaskQueueError::UnknownQueue(owner))?;
        let subsumed = entry.subsumed.take().ok_or(TaskQueueError::NotMerged(owner))?;
        if let Some(subsumed_entry) = entries.get_mut(subsumed) {
            subsumed_entry.owner = None;
        }
        drop(entries);

        self.unmerges.fetch_add(1, Ordering::AcqRel);
        debug!(?owner, ?subsumed, "unmerged task queues");
        self.task_available.notify_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    fn recorder() -> (Arc<StdMutex<Vec<&'static str>>>, impl Fn(&'static str) -> Task) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |label: &'static str| -> Task {
            let log = log_clone.clone();
            Box::new(move || log.lock().unwrap().push(label))
        };
        (log, make)
    }

    #[test]
    fn test_queue_owns_itself() {
        let queues = TaskQueues::new();
        let a = queues.create_task_queue();
        let b = queues.create_task_queue();

        assert!(queues.owns(a, a));
        assert!(!queues.owns(a, b));
        assert!(!queues.owns(b, a));
    }

    #[test]
    fn test_merge_and_unmerge_links() {
        let queues = TaskQueues::new();
        let owner = queues.create_task_queue();
        let subsumed = queues.create_task_queue();

        queues.merge(owner, subsumed).unwrap();
        assert!(queues.owns(owner, subsumed));
        assert!(!queues.owns(subsumed, owner));

        queues.unmerge(owner).unwrap();
        assert!(!queues.owns(owner, subsumed));
        assert_eq!(queues.merge_count(), 1);
        assert_eq!(queues.unmerge_count(), 1);
    }

    #[test]
    fn test_merge_same_pair_twice_is_noop() {
        let queues = TaskQueues::new();
        let owner = queues.create_task_queue();
        let subsumed = queues.create_task_queue();

        queues.merge(owner, subsumed).unwrap();
        queues.merge(owner, subsumed).unwrap();
        queues.merge(owner, owner).unwrap();

        assert_eq!(queues.merge_count(), 1);
    }

    #[test]
    fn test_merge_conflicts() {
        let queues = TaskQueues::new();
        let a = queues.create_task_queue();
        let b = queues.create_task_queue();
        let c = queues.create_task_queue();

        queues.merge(a, b).unwrap();

        assert!(matches!(
            queues.merge(a, c),
            Err(TaskQueueError::AlreadyOwner { .. })
        ));
        assert!(matches!(
            queues.merge(c, b),
            Err(TaskQueueError::AlreadySubsumed { .. })
        ));
        assert!(matches!(
            queues.merge(b, c),
            Err(TaskQueueError::OwnerIsSubsumed { .. })
        ));
        assert!(matches!(
            queues.merge(c, a),
            Err(TaskQueueError::SubsumedIsOwner { .. })
        ));
    }

    #[test]
    fn test_unmerge_without_merge_fails() {
        let queues = TaskQueues::new();
        let a = queues.create_task_queue();

        assert!(matches!(queues.unmerge(a), Err(TaskQueueError::NotMerged(q)) if q == a));
        assert_eq!(queues.unmerge_count(), 0);
    }

    #[test]
    fn test_subsumed_tasks_run_on_owner() {
        let queues = TaskQueues::new();
        let owner = queues.create_task_queue();
        let subsumed = queues.create_task_queue();
        let (log, task) = recorder();

        queues.merge(owner, subsumed).unwrap();
        queues.post_task(subsumed, task("raster")).unwrap();
        queues.post_task(owner, task("platform")).unwrap();

        assert_eq!(queues.run_pending_tasks(subsumed), 0);
        assert_eq!(queues.run_pending_tasks(owner), 2);
        assert_eq!(*log.lock().unwrap(), vec!["platform", "raster"]);
    }

    #[test]
    fn test_tasks_return_home_after_unmerge() {
        let queues = TaskQueues::new();
        let owner = queues.create_task_queue();
        let subsumed = queues.create_task_queue();
        let (log, task) = recorder();

        queues.merge(owner, subsumed).unwrap();
        queues.post_task(subsumed, task("raster")).unwrap();
        queues.unmerge(owner).unwrap();

        assert_eq!(queues.run_pending_tasks(owner), 0);
        assert_eq!(queues.run_pending_tasks(subsumed), 1);
        assert_eq!(*log.lock().unwrap(), vec!["raster"]);
    }

    #[test]
    fn test_dispose_breaks_merge() {
        let queues = TaskQueues::new();
        let owner = queues.create_task_queue();
        let subsumed = queues.create_task_queue();

        queues.merge(owner, subsumed).unwrap();
        queues.dispose_task_queue(owner).unwrap();

        assert!(!queues.owns(owner, subsumed));
        assert!(matches!(
            queues.post_task(owner, Box::new(|| {})),
            Err(TaskQueueError::UnknownQueue(_))
        ));
        // The surviving queue is free to merge again.
        let other = queues.create_task_queue();
        queues.merge(other, subsumed).unwrap();
    }

    #[test]
    fn test_bind_current_thread_nests() {
        let queues = TaskQueues::new();
        let a = queues.create_task_queue();
        let b = queues.create_task_queue();

        assert_eq!(queues.current_task_queue_id(), None);
        {
            let _outer = queues.bind_current_thread(a).unwrap();
            assert_eq!(queues.current_task_queue_id(), Some(a));
            {
                let _inner = queues.bind_current_thread(b).unwrap();
                assert_eq!(queues.current_task_queue_id(), Some(b));
            }
            assert_eq!(queues.current_task_queue_id(), Some(a));
        }
        assert_eq!(queues.current_task_queue_id(), None);
    }
}
