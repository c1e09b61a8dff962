//! Blinc Shell Simulation
//!
//! Headless driver for the raster thread merger: several engines share one
//! platform/raster thread pair and rasterize a scripted sequence of frames,
//! merging the threads whenever a platform view shows up.

pub mod config;
pub mod sim;

pub use config::SimConfig;
pub use sim::{run, FrameAction, FrameRecord, SimReport};
