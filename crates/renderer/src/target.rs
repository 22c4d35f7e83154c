use crate::context::GraphicsContext;
use crate::error::{RenderError, RenderResult};
use crate::types::{TextureDesc, TextureFormat, TextureId};

/// One GPU image that can be drawn into and sampled from.
///
/// Size and format are fixed at creation. The binding unit and attachment
/// index are bookkeeping owned by whoever wires the target up.
#[derive(Debug)]
pub struct RenderTarget {
    id: TextureId,
    label: String,
    width: u32,
    height: u32,
    format: TextureFormat,
    unit: Option<u32>,
    attachment: Option<u32>,
    destroyed: bool,
}

impl RenderTarget {
    pub fn create(
        ctx: &mut GraphicsContext,
        label: impl Into<String>,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> RenderResult<Self> {
        let label = label.into();
        let id = ctx.create_texture(TextureDesc::new(label.clone(), width, height, format))?;
        Ok(Self {
            id,
            label,
            width,
            height,
            format,
            unit: None,
            attachment: None,
            destroyed: false,
        })
    }

    /// Texture id, or `UseAfterFree` once destroyed.
    pub fn id(&self) -> RenderResult<TextureId> {
        self.ensure_alive()?;
        Ok(self.id)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn unit(&self) -> Option<u32> {
        self.unit
    }

    pub fn attachment(&self) -> Option<u32> {
        self.attachment
    }

    pub(crate) fn set_attachment(&mut self, attachment: Option<u32>) {
        self.attachment = attachment;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Makes this target the texture sampled through `unit`.
    pub fn bind_as_input(&mut self, ctx: &mut GraphicsContext, unit: u32) -> RenderResult<()> {
        self.ensure_alive()?;
        ctx.bind_texture(unit, Some(self.id))?;
        self.unit = Some(unit);
        Ok(())
    }

    pub fn destroy(&mut self, ctx: &mut GraphicsContext) -> RenderResult<()> {
        self.ensure_alive()?;
        ctx.destroy_texture(self.id)?;
        self.destroyed = true;
        self.unit = None;
        tracing::debug!(label = %self.label, "render target destroyed");
        Ok(())
    }

    fn ensure_alive(&self) -> RenderResult<()> {
        if self.destroyed {
            return Err(RenderError::UseAfterFree {
                label: self.label.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_records_the_unit() {
        let mut ctx = GraphicsContext::software(4, 4);
        let mut target =
            RenderTarget::create(&mut ctx, "Sum", 4, 4, TextureFormat::Rgba32Float).unwrap();
        target.bind_as_input(&mut ctx, 2).unwrap();
        assert_eq!(target.unit(), Some(2));
        assert_eq!(ctx.bound_texture(2), Some(target.id().unwrap()));
    }

    #[test]
    fn second_destroy_is_use_after_free() {
        let mut ctx = GraphicsContext::software(4, 4);
        let mut target =
            RenderTarget::create(&mut ctx, "Sum", 4, 4, TextureFormat::Rgba32Float).unwrap();
        target.destroy(&mut ctx).unwrap();
        assert_eq!(ctx.live_textures(), 0);

        assert!(matches!(
            target.destroy(&mut ctx),
            Err(RenderError::UseAfterFree { label }) if label == "Sum"
        ));
        assert!(matches!(
            target.bind_as_input(&mut ctx, 0),
            Err(RenderError::UseAfterFree { .. })
        ));
    }
}
