//! The registry seam consumed by the thread merger

use crate::{Result, TaskQueueId};

/// Queue identity and merge primitives
///
/// Implementations must be safe to call from any thread. `merge` and `unmerge`
/// are not required to be cheaply idempotent; callers are expected to issue
/// them once per logical transition.
pub trait TaskQueueRegistry: Send + Sync {
    /// Queue bound to the calling thread, if any
    fn current_task_queue_id(&self) -> Option<TaskQueueId>;

    /// Whether `owner` currently runs `subsumed`'s tasks.
    ///
    /// A queue always owns itself.
    fn owns(&self, owner: TaskQueueId, subsumed: TaskQueueId) -> bool;

    /// Make `owner`'s thread run `subsumed`'s tasks
    fn merge(&self, owner: TaskQueueId, subsumed: TaskQueueId) -> Result<()>;

    /// Undo the merge owned by `owner`
    fn unmerge(&self, owner: TaskQueueId) -> Result<()>;
}
