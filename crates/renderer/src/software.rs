//! CPU rasterizer implementing [`Backend`].
//!
//! Pixel coverage and texel addressing follow the GLSL program exactly: each
//! destination pixel inside the quad's target rect fetches the source texel
//! picked by [`QuadRegion::source_texel`] and runs [`shade_texel`].

use std::collections::HashMap;

use crate::context::{Backend, DrawCall};
use crate::error::{RenderError, RenderResult};
use crate::program::shade_texel;
use crate::types::{BackendKind, DrawDestination, Rect, TextureDesc, TextureFormat, TextureId};

const MAX_COLOR_ATTACHMENTS: u32 = 8;
const MAX_TEXTURE_DIMENSION: u32 = 8192;

struct SoftTexture {
    width: u32,
    height: u32,
    format: TextureFormat,
    texels: Vec<[f32; 4]>,
}

impl SoftTexture {
    fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            texels: vec![[0.0; 4]; width as usize * height as usize],
        }
    }

    fn fetch(&self, x: u32, y: u32) -> [f32; 4] {
        if x >= self.width || y >= self.height {
            return [0.0; 4];
        }
        self.texels[(y * self.width + x) as usize]
    }

    fn store(&mut self, x: u32, y: u32, value: [f32; 4]) {
        let value = match self.format {
            TextureFormat::Rgba32Float => value,
            TextureFormat::Rgba8Unorm => value.map(quantize_unorm8),
        };
        let index = (y * self.width + x) as usize;
        self.texels[index] = value;
    }

    fn read(&self, rect: Rect) -> Vec<[f32; 4]> {
        let mut out = Vec::with_capacity(rect.area());
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                out.push(self.fetch(x, y));
            }
        }
        out
    }
}

fn quantize_unorm8(value: f32) -> f32 {
    (value.clamp(0.0, 1.0) * 255.0).round() / 255.0
}

/// Software backend with an RGBA8 "surface" standing in for a swapchain.
pub struct SoftwareBackend {
    textures: HashMap<TextureId, SoftTexture>,
    surface: SoftTexture,
    budget_bytes: Option<u64>,
    allocated_bytes: u64,
    presents: u64,
}

impl SoftwareBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            textures: HashMap::new(),
            surface: SoftTexture::new(width.max(1), height.max(1), TextureFormat::Rgba8Unorm),
            budget_bytes: None,
            allocated_bytes: 0,
            presents: 0,
        }
    }

    /// Caps total texture storage, making allocations past the cap fail.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.budget_bytes = Some(bytes);
        self
    }

    pub fn presents(&self) -> u64 {
        self.presents
    }

    fn texture_bytes(width: u32, height: u32, format: TextureFormat) -> u64 {
        width as u64 * height as u64 * format.bytes_per_texel() as u64
    }

    fn destination_mut(&mut self, destination: DrawDestination) -> RenderResult<&mut SoftTexture> {
        match destination {
            DrawDestination::Surface => Ok(&mut self.surface),
            DrawDestination::Texture(id) => self
                .textures
                .get_mut(&id)
                .ok_or(RenderError::UnknownTexture(id)),
        }
    }
}

impl Backend for SoftwareBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn max_color_attachments(&self) -> u32 {
        MAX_COLOR_ATTACHMENTS
    }

    fn max_texture_dimension(&self) -> u32 {
        MAX_TEXTURE_DIMENSION
    }

    fn create_texture(&mut self, id: TextureId, desc: &TextureDesc) -> RenderResult<()> {
        let bytes = Self::texture_bytes(desc.width, desc.height, desc.format);
        if let Some(budget) = self.budget_bytes {
            if self.allocated_bytes + bytes > budget {
                return Err(RenderError::Allocation {
                    label: desc.label.clone(),
                    reason: format!(
                        "out of memory ({} of {budget} bytes in use, {bytes} requested)",
                        self.allocated_bytes
                    ),
                });
            }
        }
        self.allocated_bytes += bytes;
        self.textures
            .insert(id, SoftTexture::new(desc.width, desc.height, desc.format));
        Ok(())
    }

    fn destroy_texture(&mut self, id: TextureId) {
        if let Some(texture) = self.textures.remove(&id) {
            self.allocated_bytes = self.allocated_bytes.saturating_sub(Self::texture_bytes(
                texture.width,
                texture.height,
                texture.format,
            ));
        }
    }

    fn upload_rgba8(
        &mut self,
        id: TextureId,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> RenderResult<()> {
        let texture = self
            .textures
            .get_mut(&id)
            .ok_or(RenderError::UnknownTexture(id))?;
        for (index, pixel) in data.chunks_exact(4).enumerate() {
            let x = index as u32 % width;
            let y = index as u32 / width;
            if y >= height {
                break;
            }
            texture.store(x, y, std::array::from_fn(|c| pixel[c] as f32 / 255.0));
        }
        Ok(())
    }

    fn clear(&mut self, destination: DrawDestination, color: [f32; 4]) -> RenderResult<()> {
        let texture = self.destination_mut(destination)?;
        let value = match texture.format {
            TextureFormat::Rgba32Float => color,
            TextureFormat::Rgba8Unorm => color.map(quantize_unorm8),
        };
        texture.texels.fill(value);
        Ok(())
    }

    fn draw_quad(&mut self, call: &DrawCall) -> RenderResult<()> {
        let region = call.region;
        let mut shaded = Vec::with_capacity(region.target.area());
        for y in region.target.y..region.target.bottom() {
            for x in region.target.x..region.target.right() {
                let (sx, sy) = region.source_texel(x, y);
                let [frame, sum, sum_sq] = call.inputs.map(|input| {
                    input
                        .and_then(|id| self.textures.get(&id))
                        .map(|texture| texture.fetch(sx, sy))
                        .unwrap_or([0.0; 4])
                });
                shaded.push(shade_texel(call.mode, call.num_frames, frame, sum, sum_sq));
            }
        }

        let destination = self.destination_mut(call.destination)?;
        let mut values = shaded.into_iter();
        for y in region.target.y..region.target.bottom() {
            for x in region.target.x..region.target.right() {
                if let Some(value) = values.next() {
                    destination.store(x, y, value);
                }
            }
        }
        Ok(())
    }

    fn read_texture(&mut self, id: TextureId, rect: Rect) -> RenderResult<Vec<[f32; 4]>> {
        self.textures
            .get(&id)
            .map(|texture| texture.read(rect))
            .ok_or(RenderError::UnknownTexture(id))
    }

    fn read_surface(&mut self, rect: Rect) -> RenderResult<Vec<[f32; 4]>> {
        Ok(self.surface.read(rect))
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface.width, self.surface.height)
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface = SoftTexture::new(width.max(1), height.max(1), TextureFormat::Rgba8Unorm);
    }

    fn present(&mut self) -> RenderResult<()> {
        self.presents += 1;
        Ok(())
    }
}
