//! Per-owner facade over the shared merge state

use std::sync::Arc;

use blinc_task_queue::{TaskQueueId, TaskQueueRegistry};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::shared::{MergerId, RasterThreadStatus, SharedThreadMerger, Transition};

/// Closure run whenever this owner merges or unmerges the threads
///
/// Owners use it to reset thread-affine state (GL contexts, surface caches)
/// at the moment the threads re-partition.
pub type MergeUnmergeCallback = Arc<dyn Fn() + Send + Sync>;

/// Merges the raster task queue into the platform task queue for a lease
///
/// One `RasterThreadMerger` exists per owner (typically per engine). Owners
/// that run on the same platform/raster pair share a [`SharedThreadMerger`]
/// through [`RasterThreadMerger::create_or_share`], so the registry sees a
/// single merge and a single unmerge however many owners cooperate.
///
/// A pair whose platform and raster queues are the same queue is statically
/// merged: every mutation is a no-op and every query reports merged.
pub struct RasterThreadMerger {
    id: MergerId,
    platform_queue_id: TaskQueueId,
    gpu_queue_id: TaskQueueId,
    shared_merger: Arc<SharedThreadMerger>,
    merge_unmerge_callback: Mutex<Option<MergeUnmergeCallback>>,
}

impl RasterThreadMerger {
    /// Create a merger with its own shared state
    pub fn new(
        registry: Arc<dyn TaskQueueRegistry>,
        platform_queue_id: TaskQueueId,
        gpu_queue_id: TaskQueueId,
    ) -> Arc<Self> {
        let shared_merger = Arc::new(SharedThreadMerger::new(
            registry,
            platform_queue_id,
            gpu_queue_id,
        ));
        Arc::new(Self::with_shared_merger(shared_merger))
    }

    /// Create a merger, sharing `parent`'s state when it governs the same pair
    pub fn create_or_share(
        parent: Option<&RasterThreadMerger>,
        registry: Arc<dyn TaskQueueRegistry>,
        platform_queue_id: TaskQueueId,
        gpu_queue_id: TaskQueueId,
    ) -> Arc<Self> {
        match parent {
            Some(parent)
                if parent.platform_queue_id == platform_queue_id
                    && parent.gpu_queue_id == gpu_queue_id =>
            {
                debug!(
                    platform = ?platform_queue_id,
                    raster = ?gpu_queue_id,
                    "sharing thread merger with parent"
                );
                Arc::new(Self::with_shared_merger(parent.shared_merger.clone()))
            }
            _ => Self::new(registry, platform_queue_id, gpu_queue_id),
        }
    }

    fn with_shared_merger(shared_merger: Arc<SharedThreadMerger>) -> Self {
        Self {
            id: MergerId::next(),
            platform_queue_id: shared_merger.platform_queue_id(),
            gpu_queue_id: shared_merger.gpu_queue_id(),
            shared_merger,
            merge_unmerge_callback: Mutex::new(None),
        }
    }

    pub fn id(&self) -> MergerId {
        self.id
    }

    pub fn platform_queue_id(&self) -> TaskQueueId {
        self.platform_queue_id
    }

    pub fn gpu_queue_id(&self) -> TaskQueueId {
        self.gpu_queue_id
    }

    pub fn shared_merger(&self) -> &Arc<SharedThreadMerger> {
        &self.shared_merger
    }

    /// Whether both mergers drive the same shared state
    pub fn shares_state_with(&self, other: &RasterThreadMerger) -> bool {
        Arc::ptr_eq(&self.shared_merger, &other.shared_merger)
    }

    /// Platform and raster are the same queue (statically merged)
    pub fn task_queues_are_same(&self) -> bool {
        self.platform_queue_id == self.gpu_queue_id
    }

    /// Frames left on the shared lease, `None` if no lease is held
    pub fn lease_term(&self) -> Option<usize> {
        self.shared_merger.lease_term()
    }

    /// Register the closure run on every merge and unmerge made through this merger
    pub fn set_merge_unmerge_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.merge_unmerge_callback.lock() = Some(Arc::new(callback));
    }

    /// Merge the raster queue into the platform queue for `lease_term` frames.
    ///
    /// `lease_term` must be positive. If the threads are already merged the
    /// lease is raised to `lease_term` but never shortened. Platform threads
    /// parked in [`Self::wait_until_merged`] wake after the callback returns.
    pub fn merge_with_lease(&self, lease_term: usize) {
        if self.task_queues_are_same() {
            return;
        }
        if self.shared_merger.merge_with_lease(self.id, lease_term) == Transition::Merged {
            let _publish = PublishOnDrop(&self.shared_merger);
            self.run_merge_unmerge_callback();
        }
    }

    /// Unmerge right away, unless another owner still needs the merge
    pub fn unmerge_now_if_last_one(&self) {
        if self.task_queues_are_same() {
            return;
        }
        if self.shared_merger.unmerge_now_if_last_one(self.id) == Transition::Unmerged {
            self.run_merge_unmerge_callback();
        }
    }

    /// Raise the current lease to `lease_term` frames; never shortens it
    pub fn extend_lease_to(&self, lease_term: usize) {
        if self.task_queues_are_same() {
            return;
        }
        self.shared_merger.extend_lease_to(self.id, lease_term);
    }

    /// Advance the lease by one frame
    pub fn decrement_lease(&self) -> RasterThreadStatus {
        if self.task_queues_are_same() {
            return RasterThreadStatus::RemainsMerged;
        }
        let status = self.shared_merger.decrement_lease(self.id);
        if status == RasterThreadStatus::UnmergedNow {
            self.run_merge_unmerge_callback();
        }
        status
    }

    pub fn is_merged(&self) -> bool {
        self.task_queues_are_same() || self.shared_merger.is_merged()
    }

    pub fn is_enabled(&self) -> bool {
        self.shared_merger.is_enabled()
    }

    /// Allow merging for every owner of this pair
    pub fn enable(&self) {
        self.shared_merger.enable();
    }

    /// Stop new merges for every owner of this pair
    pub fn disable(&self) {
        self.shared_merger.disable();
    }

    pub fn is_on_platform_thread(&self) -> bool {
        self.current_task_queue_id() == Some(self.platform_queue_id)
    }

    /// Whether the calling thread is the one rasterizing right now: the
    /// platform thread while merged, the raster thread otherwise.
    pub fn is_on_rasterizing_thread(&self) -> bool {
        let current = self.current_task_queue_id();
        if self.is_merged() {
            current == Some(self.platform_queue_id)
        } else {
            current == Some(self.gpu_queue_id)
        }
    }

    /// Block the platform thread until the threads are merged
    pub fn wait_until_merged(&self) {
        if self.task_queues_are_same() {
            return;
        }
        debug_assert!(
            self.is_on_platform_thread(),
            "wait_until_merged must be called on the platform thread"
        );
        self.shared_merger.wait_until_merged();
    }

    fn current_task_queue_id(&self) -> Option<TaskQueueId> {
        self.shared_merger.registry().current_task_queue_id()
    }

    fn run_merge_unmerge_callback(&self) {
        let callback = self.merge_unmerge_callback.lock().clone();
        if let Some(callback) = callback {
            trace!(merger = ?self.id, "running merge/unmerge callback");
            callback();
        }
    }
}

/// Releases merge waiters when dropped, even if the callback unwinds
struct PublishOnDrop<'a>(&'a SharedThreadMerger);

impl Drop for PublishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.publish_merge();
    }
}

impl Drop for RasterThreadMerger {
    fn drop(&mut self) {
        self.shared_merger.release_caller(self.id);
    }
}
