use framesource::{FrameError, FrameSource};
use renderer::{GraphicsContext, RenderTarget, TextureFormat, FRAME_UNIT};

use crate::SchedulerError;

/// A frame source paired with the RGBA8 texture its frames are uploaded into.
///
/// The texture is allocated at the accumulation target size and bound to
/// [`FRAME_UNIT`]; frames land in its top-left corner.
pub struct FrameInput<S> {
    source: S,
    target: RenderTarget,
    frame_size: (u32, u32),
    uploads: u64,
}

impl<S: FrameSource> FrameInput<S> {
    pub fn new(
        ctx: &mut GraphicsContext,
        source: S,
        width: u32,
        height: u32,
    ) -> Result<Self, SchedulerError> {
        let frame_size = source.frame_size();
        if frame_size.0 > width || frame_size.1 > height {
            return Err(SchedulerError::FrameTooLarge {
                width: frame_size.0,
                height: frame_size.1,
                target_width: width,
                target_height: height,
            });
        }
        let mut target = RenderTarget::create(ctx, "frame", width, height, TextureFormat::Rgba8Unorm)?;
        target.bind_as_input(ctx, FRAME_UNIT)?;
        ctx.clear_texture(target.id()?, [0.0; 4])?;
        tracing::debug!(source = %source.describe(), width, height, "frame input ready");
        Ok(Self {
            source,
            target,
            frame_size,
            uploads: 0,
        })
    }

    /// Uploads the next frame if the source has one ready.
    ///
    /// Returns `false` while the source reports "not yet available".
    pub fn try_advance(&mut self, ctx: &mut GraphicsContext) -> Result<bool, SchedulerError> {
        let Some(frame) = self.source.try_next()? else {
            return Ok(false);
        };
        let (width, height) = frame.dimensions();
        if (width, height) != self.frame_size {
            return Err(FrameError::DimensionMismatch {
                index: self.uploads as usize,
                width,
                height,
                expected_width: self.frame_size.0,
                expected_height: self.frame_size.1,
            }
            .into());
        }
        ctx.upload_rgba8(self.target.id()?, &frame)?;
        self.uploads += 1;
        tracing::trace!(upload = self.uploads, "frame uploaded");
        Ok(true)
    }

    pub fn rewind(&mut self) -> Result<(), SchedulerError> {
        self.source.rewind()?;
        Ok(())
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }

    pub(crate) fn destroy(&mut self, ctx: &mut GraphicsContext) -> Result<(), SchedulerError> {
        if !self.target.is_destroyed() {
            self.target.destroy(ctx)?;
        }
        Ok(())
    }
}
