use crate::context::GraphicsContext;
use crate::error::{FramebufferStatus, RenderError, RenderResult};
use crate::program::ShaderProgram;
use crate::target::RenderTarget;
use crate::types::{DrawDestination, QuadRegion, TextureFormat, TextureId};

#[derive(Clone, Debug)]
struct Attachment {
    id: TextureId,
    label: String,
    width: u32,
    height: u32,
    format: TextureFormat,
}

/// A group of render targets attached as color outputs of one drawing surface.
///
/// Exactly one attachment receives draws at a time. The set must validate
/// before the first draw and again after any attachment change.
#[derive(Debug)]
pub struct RenderTargetSet {
    label: String,
    slots: Vec<Option<Attachment>>,
    active: u32,
    dirty: bool,
}

impl RenderTargetSet {
    pub fn new(label: impl Into<String>, attachment_count: u32) -> Self {
        Self {
            label: label.into(),
            slots: vec![None; attachment_count as usize],
            active: 0,
            dirty: true,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn active_draw_attachment(&self) -> u32 {
        self.active
    }

    pub fn attached(&self, index: u32) -> Option<TextureId> {
        self.slots
            .get(index as usize)
            .and_then(|slot| slot.as_ref().map(|attachment| attachment.id))
    }

    /// Wires `target` to output slot `index`.
    pub fn attach(&mut self, index: u32, target: &mut RenderTarget) -> RenderResult<()> {
        let len = self.len();
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(RenderError::AttachmentOutOfRange { index, len })?;
        *slot = Some(Attachment {
            id: target.id()?,
            label: target.label().to_string(),
            width: target.width(),
            height: target.height(),
            format: target.format(),
        });
        target.set_attachment(Some(index));
        self.dirty = true;
        Ok(())
    }

    pub fn detach_all(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.dirty = true;
    }

    /// Selects the single attachment that receives subsequent draws.
    pub fn set_active_draw_attachment(&mut self, index: u32) -> RenderResult<()> {
        if index >= self.len() {
            return Err(RenderError::AttachmentOutOfRange {
                index,
                len: self.len(),
            });
        }
        if self.active != index {
            self.active = index;
            self.dirty = true;
        }
        Ok(())
    }

    /// Checks completeness when dirty, or always when `force` is set.
    pub fn validate(&mut self, ctx: &GraphicsContext, force: bool) -> RenderResult<()> {
        if !self.dirty && !force {
            return Ok(());
        }
        match self.status(ctx) {
            FramebufferStatus::Complete => {
                self.dirty = false;
                tracing::trace!(set = %self.label, "render target set validated");
                Ok(())
            }
            status => {
                tracing::debug!(set = %self.label, code = status.code(), %status, "render target set incomplete");
                Err(RenderError::IncompleteFramebuffer { status })
            }
        }
    }

    fn status(&self, ctx: &GraphicsContext) -> FramebufferStatus {
        let max = ctx.max_color_attachments();
        if self.len() > max {
            return FramebufferStatus::Unsupported {
                requested: self.len(),
                max,
            };
        }

        let mut first: Option<&Attachment> = None;
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(attachment) = slot else { continue };
            let index = index as u32;
            if !ctx.is_alive(attachment.id) {
                return FramebufferStatus::IncompleteAttachment { index };
            }
            let duplicate = self.slots[..index as usize]
                .iter()
                .flatten()
                .any(|earlier| earlier.id == attachment.id);
            if duplicate {
                return FramebufferStatus::DuplicateAttachment { index };
            }
            match first {
                None => first = Some(attachment),
                Some(reference) => {
                    if (reference.width, reference.height) != (attachment.width, attachment.height) {
                        return FramebufferStatus::IncompleteDimensions;
                    }
                    if reference.format != attachment.format {
                        return FramebufferStatus::IncompleteFormats;
                    }
                }
            }
        }
        if first.is_none() {
            return FramebufferStatus::MissingAttachments;
        }
        if self.attached(self.active).is_none() {
            return FramebufferStatus::MissingDrawBuffer { index: self.active };
        }
        FramebufferStatus::Complete
    }

    /// Makes the active attachment the draw destination until the scope ends.
    pub fn begin_draw<'a>(&mut self, ctx: &'a mut GraphicsContext) -> RenderResult<DrawScope<'a>> {
        self.validate(ctx, false)?;
        let id = self
            .attached(self.active)
            .ok_or(RenderError::IncompleteFramebuffer {
                status: FramebufferStatus::MissingDrawBuffer { index: self.active },
            })?;
        let previous = ctx.set_destination(DrawDestination::Texture(id))?;
        if let Some(Some(attachment)) = self.slots.get(self.active as usize) {
            tracing::trace!(set = %self.label, target = %attachment.label, "begin draw");
        }
        Ok(DrawScope {
            ctx,
            previous,
            restored: false,
        })
    }
}

/// Scoped "this set is the draw destination".
///
/// [`DrawScope::end`] restores the caller's previous destination; dropping the
/// scope without ending it does the same.
pub struct DrawScope<'a> {
    ctx: &'a mut GraphicsContext,
    previous: DrawDestination,
    restored: bool,
}

impl DrawScope<'_> {
    pub fn context(&mut self) -> &mut GraphicsContext {
        &mut *self.ctx
    }

    pub fn draw_quad(&mut self, program: &ShaderProgram, region: QuadRegion) -> RenderResult<()> {
        self.ctx.draw_quad(program, region)
    }

    pub fn end(mut self) -> RenderResult<()> {
        self.restore()
    }

    fn restore(&mut self) -> RenderResult<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        self.ctx.set_destination(self.previous)?;
        Ok(())
    }
}

impl Drop for DrawScope<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            tracing::warn!(error = %err, "failed to restore draw destination");
            let _ = self.ctx.set_destination(DrawDestination::Surface);
        }
    }
}
