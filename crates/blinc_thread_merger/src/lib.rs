//! Blinc Raster Thread Merger
//!
//! Embedders normally rasterize on a dedicated raster thread while the
//! platform thread handles UI and platform events. Some frames (platform views
//! composited into the scene, for example) need both jobs on one thread. The
//! merger temporarily folds the raster task queue into the platform task queue
//! for a *lease* of a few frames, then splits them again.
//!
//! - [`RasterThreadMerger`]: per-owner handle, one per engine
//! - [`SharedThreadMerger`]: the single state machine per platform/raster pair,
//!   shared by every owner running on that pair
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use blinc_task_queue::TaskQueues;
//! use blinc_thread_merger::{RasterThreadMerger, RasterThreadStatus};
//!
//! let queues = Arc::new(TaskQueues::new());
//! let platform = queues.create_task_queue();
//! let raster = queues.create_task_queue();
//!
//! let merger = RasterThreadMerger::new(queues.clone(), platform, raster);
//! merger.merge_with_lease(2);
//! assert!(merger.is_merged());
//!
//! assert_eq!(merger.decrement_lease(), RasterThreadStatus::RemainsMerged);
//! assert_eq!(merger.decrement_lease(), RasterThreadStatus::UnmergedNow);
//! assert!(!merger.is_merged());
//! ```

mod raster;
mod shared;

pub use raster::{MergeUnmergeCallback, RasterThreadMerger};
pub use shared::{MergerId, RasterThreadStatus, SharedThreadMerger};
