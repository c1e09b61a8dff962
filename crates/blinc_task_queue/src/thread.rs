//! OS threads that drain a task queue

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{trace, warn};

use crate::queues::{CurrentQueueGuard, TaskQueues};
use crate::{Result, TaskQueueError, TaskQueueId};

/// A named OS thread bound to its own task queue
///
/// The thread runs tasks posted to its queue, plus the tasks of any queue it
/// has subsumed, until it is terminated. Dropping the handle terminates and
/// joins the thread.
pub struct TaskQueueThread {
    name: String,
    queue_id: TaskQueueId,
    queues: Arc<TaskQueues>,
    handle: Option<JoinHandle<()>>,
}

impl TaskQueueThread {
    /// Create a queue and spawn a thread to serve it
    pub fn spawn(name: impl Into<String>, queues: Arc<TaskQueues>) -> Result<Self> {
        let name = name.into();
        let queue_id = queues.create_task_queue();
        let loop_queues = queues.clone();

        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let _bound = CurrentQueueGuard::bind(queue_id);
            trace!(?queue_id, "task queue thread started");
            while let Some(task) = loop_queues.wait_for_task(queue_id) {
                task();
            }
            trace!(?queue_id, "task queue thread stopped");
        });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                let _ = queues.dispose_task_queue(queue_id);
                return Err(TaskQueueError::Spawn { name, source });
            }
        };

        Ok(Self {
            name,
            queue_id,
            queues,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue_id(&self) -> TaskQueueId {
        self.queue_id
    }

    pub fn queues(&self) -> &Arc<TaskQueues> {
        &self.queues
    }

    /// Post a closure to this thread's queue
    pub fn post_task<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.queues.post_task(self.queue_id, Box::new(task))
    }

    /// Stop the thread after its current task and wait for it to exit
    pub fn join(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.queues.terminate(self.queue_id);
        let joined = handle.join();
        if let Err(e) = self.queues.dispose_task_queue(self.queue_id) {
            warn!(thread = %self.name, "failed to dispose task queue: {}", e);
        }
        joined.map_err(|_| TaskQueueError::Panicked(self.name.clone()))
    }
}

impl Drop for TaskQueueThread {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("{}", e);
        }
    }
}
