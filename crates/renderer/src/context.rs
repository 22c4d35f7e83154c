//! Explicit graphics context.
//!
//! Binding units and the current draw destination are context-global state
//! in classic GPU APIs. Here they live on [`GraphicsContext`] so that every
//! component that touches them receives the context explicitly, and tests can
//! swap the wgpu backend for [`SoftwareBackend`](crate::SoftwareBackend).

use std::collections::HashMap;

use image::RgbaImage;

use crate::error::{RenderError, RenderResult};
use crate::program::{Mode, ShaderProgram, SAMPLER_UNIFORMS};
use crate::software::SoftwareBackend;
use crate::types::{
    BackendKind, DrawDestination, QuadRegion, Rect, TextureDesc, TextureFormat, TextureId,
    BINDING_UNIT_COUNT,
};

/// One resolved full-screen quad draw handed to a backend.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCall {
    pub mode: Mode,
    pub num_frames: f32,
    /// Textures for `FrameTx`, `SumTx`, `SumSqTx`; `None` when the mode does not sample it.
    pub inputs: [Option<TextureId>; 3],
    pub destination: DrawDestination,
    pub region: QuadRegion,
}

/// Operations a graphics backend provides.
///
/// The context validates ids, units and hazards before calling in, so
/// backends only deal with storage and rasterization.
pub trait Backend {
    fn kind(&self) -> BackendKind;

    fn max_color_attachments(&self) -> u32;

    fn max_texture_dimension(&self) -> u32;

    fn create_texture(&mut self, id: TextureId, desc: &TextureDesc) -> RenderResult<()>;

    fn destroy_texture(&mut self, id: TextureId);

    /// Writes tightly packed RGBA8 rows into the top-left corner of `id`.
    fn upload_rgba8(&mut self, id: TextureId, width: u32, height: u32, data: &[u8])
        -> RenderResult<()>;

    fn clear(&mut self, destination: DrawDestination, color: [f32; 4]) -> RenderResult<()>;

    fn draw_quad(&mut self, call: &DrawCall) -> RenderResult<()>;

    /// Reads `rect` of a texture back as linear RGBA floats, row-major.
    fn read_texture(&mut self, id: TextureId, rect: Rect) -> RenderResult<Vec<[f32; 4]>>;

    fn read_surface(&mut self, rect: Rect) -> RenderResult<Vec<[f32; 4]>>;

    fn surface_size(&self) -> (u32, u32);

    fn resize_surface(&mut self, width: u32, height: u32);

    fn present(&mut self) -> RenderResult<()>;
}

/// Context-global binding state plus the backend that executes commands.
pub struct GraphicsContext {
    backend: Box<dyn Backend>,
    textures: HashMap<TextureId, TextureDesc>,
    next_id: u64,
    units: [Option<TextureId>; BINDING_UNIT_COUNT],
    destination: DrawDestination,
    draws: u64,
}

impl GraphicsContext {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        tracing::debug!(backend = %backend.kind(), "graphics context ready");
        Self {
            backend,
            textures: HashMap::new(),
            next_id: 1,
            units: [None; BINDING_UNIT_COUNT],
            destination: DrawDestination::Surface,
            draws: 0,
        }
    }

    /// Context backed by the CPU rasterizer with a `width` x `height` surface.
    pub fn software(width: u32, height: u32) -> Self {
        Self::new(Box::new(SoftwareBackend::new(width, height)))
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn max_color_attachments(&self) -> u32 {
        self.backend.max_color_attachments()
    }

    pub fn draw_count(&self) -> u64 {
        self.draws
    }

    pub fn create_texture(&mut self, desc: TextureDesc) -> RenderResult<TextureId> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::Allocation {
                label: desc.label,
                reason: "zero-sized texture".to_string(),
            });
        }
        let max = self.backend.max_texture_dimension();
        if desc.width > max || desc.height > max {
            return Err(RenderError::Allocation {
                reason: format!(
                    "{}x{} exceeds the maximum texture dimension {max}",
                    desc.width, desc.height
                ),
                label: desc.label,
            });
        }

        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.backend.create_texture(id, &desc)?;
        tracing::trace!(%id, label = %desc.label, width = desc.width, height = desc.height, "texture created");
        self.textures.insert(id, desc);
        Ok(id)
    }

    /// Releases a texture and clears every reference the context holds to it.
    pub fn destroy_texture(&mut self, id: TextureId) -> RenderResult<TextureDesc> {
        let desc = self
            .textures
            .remove(&id)
            .ok_or(RenderError::UnknownTexture(id))?;
        for unit in self.units.iter_mut() {
            if *unit == Some(id) {
                *unit = None;
            }
        }
        if self.destination == DrawDestination::Texture(id) {
            self.destination = DrawDestination::Surface;
        }
        self.backend.destroy_texture(id);
        tracing::trace!(%id, label = %desc.label, "texture destroyed");
        Ok(desc)
    }

    pub fn is_alive(&self, id: TextureId) -> bool {
        self.textures.contains_key(&id)
    }

    pub fn texture_desc(&self, id: TextureId) -> Option<&TextureDesc> {
        self.textures.get(&id)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Binds `texture` to `unit`, returning what was bound before.
    pub fn bind_texture(
        &mut self,
        unit: u32,
        texture: Option<TextureId>,
    ) -> RenderResult<Option<TextureId>> {
        let slot = self
            .units
            .get_mut(unit as usize)
            .ok_or(RenderError::BindingUnitOutOfRange {
                unit,
                max: BINDING_UNIT_COUNT as u32,
            })?;
        if let Some(id) = texture {
            if !self.textures.contains_key(&id) {
                return Err(RenderError::UnknownTexture(id));
            }
        }
        Ok(std::mem::replace(slot, texture))
    }

    pub fn bound_texture(&self, unit: u32) -> Option<TextureId> {
        self.units.get(unit as usize).copied().flatten()
    }

    pub fn destination(&self) -> DrawDestination {
        self.destination
    }

    /// Redirects subsequent draws, returning the previous destination.
    pub fn set_destination(&mut self, destination: DrawDestination) -> RenderResult<DrawDestination> {
        if let DrawDestination::Texture(id) = destination {
            if !self.textures.contains_key(&id) {
                return Err(RenderError::UnknownTexture(id));
            }
        }
        Ok(std::mem::replace(&mut self.destination, destination))
    }

    /// Uploads an RGBA8 image into the top-left corner of an RGBA8 texture.
    pub fn upload_rgba8(&mut self, id: TextureId, image: &RgbaImage) -> RenderResult<()> {
        let desc = self.textures.get(&id).ok_or(RenderError::UnknownTexture(id))?;
        if desc.format != TextureFormat::Rgba8Unorm {
            return Err(RenderError::Allocation {
                label: desc.label.clone(),
                reason: "uploads require an Rgba8Unorm texture".to_string(),
            });
        }
        let (width, height) = image.dimensions();
        if width > desc.width || height > desc.height {
            return Err(RenderError::UploadTooLarge {
                width,
                height,
                target_width: desc.width,
                target_height: desc.height,
            });
        }
        self.backend.upload_rgba8(id, width, height, image.as_raw())
    }

    pub fn clear_texture(&mut self, id: TextureId, color: [f32; 4]) -> RenderResult<()> {
        if !self.textures.contains_key(&id) {
            return Err(RenderError::UnknownTexture(id));
        }
        self.backend.clear(DrawDestination::Texture(id), color)
    }

    pub fn clear_surface(&mut self, color: [f32; 4]) -> RenderResult<()> {
        self.backend.clear(DrawDestination::Surface, color)
    }

    /// Draws one quad with `program` into the current destination.
    ///
    /// Only the samplers the program's mode reads are resolved. Each must
    /// name a live texture that is not also the destination.
    pub fn draw_quad(&mut self, program: &ShaderProgram, region: QuadRegion) -> RenderResult<()> {
        let mode = program.mode();
        let mut inputs = [None; 3];
        for (slot, &uniform) in SAMPLER_UNIFORMS.iter().enumerate() {
            if !mode.sampled_inputs().contains(&uniform) {
                continue;
            }
            let unit = program
                .texture_unit(uniform)
                .ok_or_else(|| RenderError::UnknownUniform(uniform.to_string()))?;
            let texture = self
                .bound_texture(unit)
                .ok_or(RenderError::UnboundInput { uniform, unit })?;
            if self.destination == DrawDestination::Texture(texture) {
                return Err(RenderError::FeedbackLoop { uniform, unit });
            }
            inputs[slot] = Some(texture);
        }

        let (dest_width, dest_height) = match self.destination {
            DrawDestination::Surface => self.backend.surface_size(),
            DrawDestination::Texture(id) => {
                let desc = self.textures.get(&id).ok_or(RenderError::UnknownTexture(id))?;
                (desc.width, desc.height)
            }
        };
        if region.target.is_empty() || !region.target.fits_within(dest_width, dest_height) {
            return Err(RenderError::RegionOutOfBounds {
                rect: region.target,
                width: dest_width,
                height: dest_height,
            });
        }

        let call = DrawCall {
            mode,
            num_frames: program.num_frames(),
            inputs,
            destination: self.destination,
            region,
        };
        self.backend.draw_quad(&call)?;
        self.draws += 1;
        tracing::trace!(?mode, destination = ?call.destination, "quad drawn");
        Ok(())
    }

    pub fn read_texture(&mut self, id: TextureId, rect: Rect) -> RenderResult<Vec<[f32; 4]>> {
        let desc = self.textures.get(&id).ok_or(RenderError::UnknownTexture(id))?;
        if !rect.fits_within(desc.width, desc.height) {
            return Err(RenderError::Readback(format!(
                "rect {rect} outside texture '{}' ({}x{})",
                desc.label, desc.width, desc.height
            )));
        }
        self.backend.read_texture(id, rect)
    }

    pub fn read_surface(&mut self, rect: Rect) -> RenderResult<Vec<[f32; 4]>> {
        let (width, height) = self.backend.surface_size();
        if !rect.fits_within(width, height) {
            return Err(RenderError::Readback(format!(
                "rect {rect} outside surface ({width}x{height})"
            )));
        }
        self.backend.read_surface(rect)
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.backend.surface_size()
    }

    pub fn resize_surface(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.backend.resize_surface(width, height);
    }

    pub fn present(&mut self) -> RenderResult<()> {
        self.backend.present()
    }
}
