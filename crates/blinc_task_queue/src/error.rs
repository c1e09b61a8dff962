//! Task queue error types

use thiserror::Error;

use crate::TaskQueueId;

/// Task queue errors
#[derive(Error, Debug)]
pub enum TaskQueueError {
    /// The queue was never created or has been disposed
    #[error("unknown task queue {0:?}")]
    UnknownQueue(TaskQueueId),

    /// The queue is already run by another owner
    #[error("task queue {queue:?} is already subsumed by {owner:?}")]
    AlreadySubsumed {
        queue: TaskQueueId,
        owner: TaskQueueId,
    },

    /// The owner already runs a different queue's tasks
    #[error("task queue {owner:?} already owns {subsumed:?}")]
    AlreadyOwner {
        owner: TaskQueueId,
        subsumed: TaskQueueId,
    },

    /// An owner cannot itself be subsumed
    #[error("task queue {owner:?} is subsumed by {by:?} and cannot own another queue")]
    OwnerIsSubsumed { owner: TaskQueueId, by: TaskQueueId },

    /// A queue that owns another queue cannot be subsumed
    #[error("task queue {queue:?} owns {subsumed:?} and cannot be subsumed")]
    SubsumedIsOwner {
        queue: TaskQueueId,
        subsumed: TaskQueueId,
    },

    /// Unmerge requested for a queue that owns nothing
    #[error("task queue {0:?} is not merged")]
    NotMerged(TaskQueueId),

    /// The queue stopped accepting tasks
    #[error("task queue {0:?} has been terminated")]
    Terminated(TaskQueueId),

    /// Failed to start a queue thread
    #[error("failed to spawn task queue thread `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A task panicked on a queue thread
    #[error("task queue thread `{0}` panicked")]
    Panicked(String),
}

/// Result type for task queue operations
pub type Result<T> = std::result::Result<T, TaskQueueError>;
