use image::{Rgba, RgbaImage};

use crate::{check_dimensions, FrameError, FrameSource};

/// In-memory frames replayed in order, looping forever.
#[derive(Debug, Clone)]
pub struct MemorySource {
    frames: Vec<RgbaImage>,
    cursor: usize,
    latency: u32,
    pending_polls: u32,
}

impl MemorySource {
    pub fn new(frames: Vec<RgbaImage>) -> Result<Self, FrameError> {
        let first = frames.first().ok_or(FrameError::NoFrames)?;
        let size = first.dimensions();
        for (index, frame) in frames.iter().enumerate() {
            check_dimensions(index, frame, size)?;
        }
        Ok(Self {
            frames,
            cursor: 0,
            latency: 0,
            pending_polls: 0,
        })
    }

    /// One uniformly coloured `width` x `height` frame per entry of `colors`.
    pub fn solid(width: u32, height: u32, colors: &[[u8; 4]]) -> Result<Self, FrameError> {
        Self::new(
            colors
                .iter()
                .map(|color| RgbaImage::from_pixel(width, height, Rgba(*color)))
                .collect(),
        )
    }

    /// Makes every frame report "not yet available" for `polls` calls first.
    pub fn with_latency(mut self, polls: u32) -> Self {
        self.latency = polls;
        self.pending_polls = polls;
        self
    }
}

impl FrameSource for MemorySource {
    fn frame_size(&self) -> (u32, u32) {
        self.frames[0].dimensions()
    }

    fn try_next(&mut self) -> Result<Option<RgbaImage>, FrameError> {
        if self.pending_polls > 0 {
            self.pending_polls -= 1;
            return Ok(None);
        }
        let frame = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        self.pending_polls = self.latency;
        Ok(Some(frame))
    }

    fn rewind(&mut self) -> Result<(), FrameError> {
        self.cursor = 0;
        self.pending_polls = self.latency;
        Ok(())
    }

    fn len(&self) -> Option<usize> {
        Some(self.frames.len())
    }

    fn describe(&self) -> String {
        let (width, height) = self.frame_size();
        format!("memory ({} frames, {width}x{height})", self.frames.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_frame_list_is_rejected() {
        assert!(matches!(MemorySource::new(Vec::new()), Err(FrameError::NoFrames)));
    }

    #[test]
    fn mismatched_frames_are_rejected() {
        let frames = vec![RgbaImage::new(2, 2), RgbaImage::new(3, 2)];
        assert!(matches!(
            MemorySource::new(frames),
            Err(FrameError::DimensionMismatch { index: 1, width: 3, .. })
        ));
    }

    #[test]
    fn latency_holds_each_frame_back() {
        let mut source = MemorySource::solid(1, 1, &[[1, 0, 0, 255], [2, 0, 0, 255]])
            .unwrap()
            .with_latency(2);
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(source.try_next().unwrap().map(|frame| frame.get_pixel(0, 0)[0]));
        }
        assert_eq!(seen, vec![None, None, Some(1), None, None, Some(2)]);
    }
}
