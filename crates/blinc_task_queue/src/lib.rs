//! Blinc Task Queues
//!
//! Logical, strictly single-threaded execution contexts used by the embedder
//! runtime. Every engine runs its work on a small set of task queues (the
//! platform queue, the raster queue, ...), each normally drained by its own OS
//! thread.
//!
//! Two queues can be *merged*: the owner queue's thread then runs the subsumed
//! queue's tasks as well, and the subsumed thread idles until the pair is
//! unmerged again. The thread merger builds on exactly three primitives from
//! this crate, exposed through the [`TaskQueueRegistry`] trait:
//!
//! - queue identity for the calling thread
//! - merge / unmerge of a queue pair
//! - ownership queries
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use blinc_task_queue::{TaskQueueRegistry, TaskQueueThread, TaskQueues};
//!
//! let queues = Arc::new(TaskQueues::new());
//! let platform = TaskQueueThread::spawn("platform", queues.clone()).unwrap();
//! let raster = TaskQueueThread::spawn("raster", queues.clone()).unwrap();
//!
//! queues.merge(platform.queue_id(), raster.queue_id()).unwrap();
//! assert!(queues.owns(platform.queue_id(), raster.queue_id()));
//!
//! // Runs on the platform thread while the pair is merged.
//! raster.post_task(|| {}).unwrap();
//!
//! queues.unmerge(platform.queue_id()).unwrap();
//! ```

mod error;
mod queues;
mod registry;
mod thread;

pub use error::{Result, TaskQueueError};
pub use queues::{current_task_queue_id, CurrentQueueGuard, Task, TaskQueues};
pub use registry::TaskQueueRegistry;
pub use thread::TaskQueueThread;

use slotmap::new_key_type;

new_key_type! {
    /// Opaque identifier of a logical task queue
    pub struct TaskQueueId;
}
