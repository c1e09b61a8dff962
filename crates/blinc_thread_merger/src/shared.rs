//! Shared merge state for one platform/raster queue pair
//!
//! Every [`RasterThreadMerger`](crate::RasterThreadMerger) that governs the
//! same pair points at one [`SharedThreadMerger`]. It is the only place that
//! talks to the registry, so a pair is merged and unmerged exactly once per
//! logical transition no matter how many owners ask.
//!
//! States:
//!
//! ```text
//!             merge_with_lease(n)
//!   Unmerged ---------------------> Merged(n)
//!      ^                              |  decrement_lease      (n > 1)
//!      |                              v
//!      +------ decrement_lease --- Merged(1)
//!      +------ unmerge_now_if_last_one (no other interested owner)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use blinc_task_queue::{TaskQueueId, TaskQueueRegistry};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashSet;
use tracing::{debug, trace, warn};

/// Result of advancing a lease by one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterThreadStatus {
    /// The threads are still merged after this frame
    RemainsMerged,
    /// The threads were not merged to begin with
    RemainsUnmerged,
    /// The lease expired on this frame and the threads were unmerged
    UnmergedNow,
}

/// Identity of one owner among the sharers of a [`SharedThreadMerger`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MergerId(u64);

impl MergerId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// State change performed by a shared merger call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    None,
    Merged,
    Unmerged,
}

struct MergeState {
    is_merged: bool,
    /// Frames left before the merge is undone. `None` when no lease is held,
    /// including pairs that were already merged by someone else.
    lease_term: Option<usize>,
    enabled: bool,
    /// Set once the merging call has finished its callback. Waiters only
    /// wake on a published merge.
    published: bool,
    /// Owners that still need the merge
    interested: FxHashSet<MergerId>,
}

/// Authoritative merge state machine for one queue pair
pub struct SharedThreadMerger {
    owner: TaskQueueId,
    subsumed: TaskQueueId,
    registry: Arc<dyn TaskQueueRegistry>,
    state: Mutex<MergeState>,
    merged: Condvar,
}

impl SharedThreadMerger {
    /// Create the state for the pair `(owner, subsumed)`
    ///
    /// The pair starts out merged if the registry already reports `owner`
    /// owning `subsumed`, which is always the case when both ids are equal.
    pub fn new(
        registry: Arc<dyn TaskQueueRegistry>,
        owner: TaskQueueId,
        subsumed: TaskQueueId,
    ) -> Self {
        let is_merged = registry.owns(owner, subsumed);
        Self {
            owner,
            subsumed,
            registry,
            state: Mutex::new(MergeState {
                is_merged,
                lease_term: None,
                enabled: true,
                published: is_merged,
                interested: FxHashSet::default(),
            }),
            merged: Condvar::new(),
        }
    }

    pub fn platform_queue_id(&self) -> TaskQueueId {
        self.owner
    }

    pub fn gpu_queue_id(&self) -> TaskQueueId {
        self.subsumed
    }

    pub fn registry(&self) -> &Arc<dyn TaskQueueRegistry> {
        &self.registry
    }

    pub fn is_merged(&self) -> bool {
        self.state.lock().is_merged
    }

    /// Frames left on the current lease, `None` if no lease is held
    pub fn lease_term(&self) -> Option<usize> {
        self.state.lock().lease_term
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Allow merging again
    pub fn enable(&self) {
        self.state.lock().enabled = true;
        trace!(platform = ?self.owner, raster = ?self.subsumed, "thread merging enabled");
    }

    /// Fence out new merges. An in-flight merge stays in place and its lease
    /// stops counting down until merging is enabled again.
    pub fn disable(&self) {
        self.state.lock().enabled = false;
        trace!(platform = ?self.owner, raster = ?self.subsumed, "thread merging disabled");
    }

    /// Number of owners currently relying on the merge
    pub fn interested_count(&self) -> usize {
        self.state.lock().interested.len()
    }

    pub(crate) fn merge_with_lease(&self, caller: MergerId, lease_term: usize) -> Transition {
        debug_assert!(lease_term > 0, "lease_term must be positive");
        if lease_term == 0 {
            warn!(?caller, "ignoring merge request with an empty lease");
            return Transition::None;
        }

        let mut state = self.state.lock();
        if !state.enabled {
            trace!(?caller, "merge request ignored, merging is disabled");
            return Transition::None;
        }
        state.interested.insert(caller);

        if state.is_merged {
            // Raise the floor; a shorter request never cuts another owner's lease.
            if let Some(current) = state.lease_term {
                if lease_term > current {
                    state.lease_term = Some(lease_term);
                }
            }
            return Transition::None;
        }

        if let Err(e) = self.registry.merge(self.owner, self.subsumed) {
            panic!("unable to merge the raster and platform task queues: {e}");
        }
        state.is_merged = true;
        state.published = false;
        state.lease_term = Some(lease_term);

        debug!(
            platform = ?self.owner,
            raster = ?self.subsumed,
            lease_term,
            ?caller,
            "merged raster and platform threads"
        );
        Transition::Merged
    }

    /// Wake platform threads parked in [`Self::wait_until_merged`]. Called by
    /// the merging owner once its callback has run.
    pub(crate) fn publish_merge(&self) {
        let mut state = self.state.lock();
        if state.is_merged {
            state.published = true;
            self.merged.notify_all();
        }
    }

    pub(crate) fn extend_lease_to(&self, caller: MergerId, lease_term: usize) {
        debug_assert!(lease_term > 0, "lease_term must be positive");
        if lease_term == 0 {
            warn!(?caller, "ignoring lease extension to an empty lease");
            return;
        }

        let mut state = self.state.lock();
        if !state.enabled || !state.is_merged {
            return;
        }
        let Some(current) = state.lease_term else {
            return;
        };
        state.interested.insert(caller);
        if lease_term > current {
            state.lease_term = Some(lease_term);
            trace!(?caller, from = current, to = lease_term, "extended merge lease");
        }
    }

    pub(crate) fn decrement_lease(&self, caller: MergerId) -> RasterThreadStatus {
        let mut state = self.state.lock();
        if !state.is_merged {
            return RasterThreadStatus::RemainsUnmerged;
        }
        if !state.enabled {
            trace!(?caller, "lease frozen, merging is disabled");
            return RasterThreadStatus::RemainsMerged;
        }
        let Some(current) = state.lease_term else {
            return RasterThreadStatus::RemainsMerged;
        };
        debug_assert!(current > 0, "merged with an exhausted lease");

        let remaining = current.saturating_sub(1);
        if remaining > 0 {
            state.lease_term = Some(remaining);
            return RasterThreadStatus::RemainsMerged;
        }

        self.unmerge_locked(&mut state);
        debug!(?caller, "merge lease expired");
        RasterThreadStatus::UnmergedNow
    }

    pub(crate) fn unmerge_now_if_last_one(&self, caller: MergerId) -> Transition {
        let mut state = self.state.lock();
        if !state.enabled {
            return Transition::None;
        }
        state.interested.remove(&caller);
        if !state.is_merged || state.lease_term.is_none() {
            return Transition::None;
        }
        if !state.interested.is_empty() {
            trace!(
                ?caller,
                remaining_owners = state.interested.len(),
                "unmerge deferred, other owners still need the merge"
            );
            return Transition::None;
        }

        self.unmerge_locked(&mut state);
        debug!(?caller, "unmerged by the last interested owner");
        Transition::Unmerged
    }

    /// Block until the pair is merged
    pub(crate) fn wait_until_merged(&self) {
        let mut state = self.state.lock();
        while !(state.is_merged && state.published) {
            self.merged.wait(&mut state);
        }
    }

    /// Forget an owner that is going away. Never unmerges.
    pub(crate) fn release_caller(&self, caller: MergerId) {
        self.state.lock().interested.remove(&caller);
    }

    fn unmerge_locked(&self, state: &mut MergeState) {
        if let Err(e) = self.registry.unmerge(self.owner) {
            panic!("unable to unmerge the raster and platform task queues: {e}");
        }
        state.is_merged = false;
        state.published = false;
        state.lease_term = None;
        state.interested.clear();

        debug!(
            platform = ?self.owner,
            raster = ?self.subsumed,
            "unmerged raster and platform threads"
        );
    }
}
