//! Frame-by-frame shell simulation
//!
//! Spawns one platform thread and one raster thread, attaches every engine to
//! them through a shared [`RasterThreadMerger`], and rasterizes the configured
//! number of frames. On frames with a platform view the raster thread asks for
//! a merge and the platform thread blocks until it sees it, the way an
//! embedder compositing a platform view would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use blinc_task_queue::{TaskQueueThread, TaskQueues};
use blinc_thread_merger::{RasterThreadMerger, RasterThreadStatus};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::SimConfig;

/// Upper bound on how long one frame may take before the run is abandoned
const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// What an engine did with its merger on a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameAction {
    /// Platform view present, merge requested
    MergeRequested,
    /// Engine asked to unmerge immediately
    Released,
    RemainsMerged,
    RemainsUnmerged,
    UnmergedNow,
}

impl From<RasterThreadStatus> for FrameAction {
    fn from(status: RasterThreadStatus) -> Self {
        match status {
            RasterThreadStatus::RemainsMerged => FrameAction::RemainsMerged,
            RasterThreadStatus::RemainsUnmerged => FrameAction::RemainsUnmerged,
            RasterThreadStatus::UnmergedNow => FrameAction::UnmergedNow,
        }
    }
}

/// One engine's view of one frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameRecord {
    pub frame: u32,
    pub engine: usize,
    pub action: FrameAction,
    /// Merge state right after the action
    pub merged: bool,
    /// Name of the thread that ran the raster task
    pub rasterized_on: String,
}

/// Outcome of a simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub frames: Vec<FrameRecord>,
    pub registry_merges: usize,
    pub registry_unmerges: usize,
    pub callback_transitions: usize,
    pub merged_at_exit: bool,
}

impl SimReport {
    /// Human-readable summary, one line per frame and engine
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for record in &self.frames {
            out.push_str(&format!(
                "frame {:>3} engine {:>2} {:<18} merged={:<5} on {}\n",
                record.frame,
                record.engine,
                format!("{:?}", record.action),
                record.merged,
                record.rasterized_on
            ));
        }
        out.push_str(&format!(
            "registry merges={} unmerges={} callbacks={} merged_at_exit={}\n",
            self.registry_merges,
            self.registry_unmerges,
            self.callback_transitions,
            self.merged_at_exit
        ));
        out
    }
}

pub const PLATFORM_THREAD_NAME: &str = "blinc-platform";
pub const RASTER_THREAD_NAME: &str = "blinc-raster";

/// Run the simulation described by `config`
pub fn run(config: &SimConfig) -> Result<SimReport> {
    config.validate()?;

    let queues = Arc::new(TaskQueues::new());
    let platform = TaskQueueThread::spawn(PLATFORM_THREAD_NAME, queues.clone())?;
    let raster = TaskQueueThread::spawn(RASTER_THREAD_NAME, queues.clone())?;
    info!(
        engines = config.engines,
        frames = config.frames,
        "starting shell simulation"
    );

    let callback_transitions = Arc::new(AtomicUsize::new(0));
    let mut mergers: Vec<Arc<RasterThreadMerger>> = Vec::with_capacity(config.engines);
    for engine in 0..config.engines {
        let merger = RasterThreadMerger::create_or_share(
            mergers.first().map(|first| first.as_ref()),
            queues.clone(),
            platform.queue_id(),
            raster.queue_id(),
        );
        let transitions = callback_transitions.clone();
        merger.set_merge_unmerge_callback(move || {
            transitions.fetch_add(1, Ordering::SeqCst);
            debug!(engine, "threads re-partitioned, resetting raster state");
        });
        mergers.push(merger);
    }
    let mergers = Arc::new(mergers);
    let records = Arc::new(Mutex::new(Vec::new()));

    for frame in 0..config.frames {
        let platform_view = config.has_platform_view(frame);
        let release = config.release_engine_on_frame == Some(frame);
        let lease_term = config.lease_term;
        let (done_tx, done_rx) = bounded(1);

        {
            let mergers = mergers.clone();
            let records = records.clone();
            raster.post_task(move || {
                let rasterized_on = thread::current().name().unwrap_or_default().to_string();
                for (engine, merger) in mergers.iter().enumerate() {
                    let action = if platform_view {
                        merger.merge_with_lease(lease_term);
                        FrameAction::MergeRequested
                    } else if release && engine == 0 {
                        merger.unmerge_now_if_last_one();
                        FrameAction::Released
                    } else {
                        merger.decrement_lease().into()
                    };
                    records.lock().push(FrameRecord {
                        frame,
                        engine,
                        action,
                        merged: merger.is_merged(),
                        rasterized_on: rasterized_on.clone(),
                    });
                }
                let _ = done_tx.send(());
            })?;
        }

        if platform_view {
            let (merged_tx, merged_rx) = bounded(1);
            let merger = mergers[0].clone();
            platform.post_task(move || {
                merger.wait_until_merged();
                let _ = merged_tx.send(());
            })?;
            merged_rx
                .recv_timeout(FRAME_TIMEOUT)
                .with_context(|| format!("platform thread never saw the merge on frame {frame}"))?;
        }

        done_rx
            .recv_timeout(FRAME_TIMEOUT)
            .with_context(|| format!("frame {frame} did not finish rasterizing"))?;

        if config.frame_interval_ms > 0 {
            thread::sleep(Duration::from_millis(config.frame_interval_ms));
        }
    }

    // Fence out further merges while the shell tears down.
    mergers[0].disable();
    let merged_at_exit = mergers[0].is_merged();

    let report = SimReport {
        frames: std::mem::take(&mut *records.lock()),
        registry_merges: queues.merge_count(),
        registry_unmerges: queues.unmerge_count(),
        callback_transitions: callback_transitions.load(Ordering::SeqCst),
        merged_at_exit,
    };

    drop(mergers);
    platform.join()?;
    raster.join()?;

    info!(
        merges = report.registry_merges,
        unmerges = report.registry_unmerges,
        "shell simulation finished"
    );
    Ok(report)
}
