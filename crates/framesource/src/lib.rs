//! Frame sources feeding the accumulation pipeline.
//!
//! Types:
//!
//! - `FrameSource` is the narrow interface the scheduler polls once per load
//!   step: `try_next` never blocks and returns `Ok(None)` while no frame is
//!   ready yet.
//! - `FileSequence` replays the images of a directory in file-name order,
//!   looping back to the first after the last.
//! - `MemorySource` replays in-memory frames, optionally holding each one back
//!   for a few polls to mimic camera latency.
//! - `CaptureSource` runs any source on a background thread and exposes only
//!   its most recent frame.
//! - `FrameError` covers discovery, decode, and capture failures.

mod capture;
mod memory;
mod sequence;

use std::path::PathBuf;

use image::RgbaImage;
use thiserror::Error;

pub use capture::CaptureSource;
pub use memory::MemorySource;
pub use sequence::{FileSequence, SUPPORTED_EXTENSIONS};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("no frames found in {}", .0.display())]
    Empty(PathBuf),

    #[error("frame source holds no frames")]
    NoFrames,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("frame {index} is {width}x{height}, expected {expected_width}x{expected_height}")]
    DimensionMismatch {
        index: usize,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("capture thread disconnected")]
    Disconnected,
}

/// Produces successive frames for the load steps.
pub trait FrameSource: Send {
    /// Width and height shared by every frame this source yields.
    fn frame_size(&self) -> (u32, u32);

    /// Next frame, or `Ok(None)` when none is available yet.
    fn try_next(&mut self) -> Result<Option<RgbaImage>, FrameError>;

    /// Restarts the sequence so the next frame is the first one again.
    fn rewind(&mut self) -> Result<(), FrameError>;

    /// Number of distinct frames before the source loops, if finite.
    fn len(&self) -> Option<usize> {
        None
    }

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn frame_size(&self) -> (u32, u32) {
        (**self).frame_size()
    }

    fn try_next(&mut self) -> Result<Option<RgbaImage>, FrameError> {
        (**self).try_next()
    }

    fn rewind(&mut self) -> Result<(), FrameError> {
        (**self).rewind()
    }

    fn len(&self) -> Option<usize> {
        (**self).len()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

pub(crate) fn check_dimensions(
    index: usize,
    frame: &RgbaImage,
    expected: (u32, u32),
) -> Result<(), FrameError> {
    let (width, height) = frame.dimensions();
    if (width, height) != expected {
        return Err(FrameError::DimensionMismatch {
            index,
            width,
            height,
            expected_width: expected.0,
            expected_height: expected.1,
        });
    }
    Ok(())
}
