//! Step queue and pipeline state for multi-pass frame statistics.
//!
//! Types:
//!
//! - `RenderStep` is one queued unit of work; `build_schedule` lays out the
//!   sum pass, the sum-of-squares pass and the finalize step for N frames.
//! - `AccumulationSchedule` is the FIFO the pipeline drains one step per tick.
//! - `FrameInput` uploads frames from a `FrameSource` into the input texture.
//! - `AccumulationPipeline` ties the queue to the named render targets and
//!   presents StdDev once the queue is empty.
//! - `ShutdownSignal` lets another owner (window, signal handler) stop a
//!   running pipeline at the next tick.

mod input;
mod pipeline;
mod step;

use framesource::FrameError;
use renderer::RenderError;
use thiserror::Error;

pub use input::FrameInput;
pub use pipeline::{AccumulationPipeline, PipelineOptions, PipelineStats, ShutdownSignal, TickOutcome};
pub use step::{build_schedule, AccumulationSchedule, RenderStep, SchedulerState};

/// Running mean of the frames.
pub const SUM: &str = "Sum";
/// Running mean of squared deviations from [`SUM`].
pub const SUM_SQ: &str = "SumSq";
/// Per-channel standard deviation, `sqrt(SumSq)`.
pub const STD_DEV: &str = "StdDev";

pub const TARGET_NAMES: [&str; 3] = [SUM, SUM_SQ, STD_DEV];

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("frame count must be at least 1")]
    NoFrames,

    #[error("frames are {width}x{height} but targets are only {target_width}x{target_height}")]
    FrameTooLarge {
        width: u32,
        height: u32,
        target_width: u32,
        target_height: u32,
    },
}
