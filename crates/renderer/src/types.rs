use std::fmt;

/// Number of texture binding units tracked by a [`GraphicsContext`](crate::GraphicsContext).
pub const BINDING_UNIT_COUNT: usize = 16;

/// Binding unit reserved for the uploaded input frame. Named render targets
/// occupy the units below it.
pub const FRAME_UNIT: u32 = 8;

/// Opaque identifier for one texture owned by a graphics backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub(crate) u64);

impl TextureId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

/// Texel formats understood by the backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// Four 32-bit float channels; used for every accumulation target.
    Rgba32Float,
    /// Four normalized 8-bit channels; used for uploaded camera/file frames.
    Rgba8Unorm,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TextureFormat::Rgba32Float => 16,
            TextureFormat::Rgba8Unorm => 4,
        }
    }

    pub(crate) fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        }
    }
}

/// Everything a backend needs to allocate a texture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureDesc {
    pub fn new(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            format,
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }
}

/// Integer pixel rectangle with a top-left origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Returns true when the rectangle lies inside a `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width, self.height, self.x, self.y
        )
    }
}

/// Region covered by one quad draw.
///
/// `target` is the destination viewport; `source` is the texel rectangle the
/// viewport maps onto in every sampled input. Offscreen passes use the same
/// rectangle for both, the final display stretches the valid region across
/// the whole surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuadRegion {
    pub target: Rect,
    pub source: Rect,
}

impl QuadRegion {
    pub fn same(rect: Rect) -> Self {
        Self {
            target: rect,
            source: rect,
        }
    }

    pub fn stretched(target: Rect, source: Rect) -> Self {
        Self { target, source }
    }

    /// Maps a destination pixel to the source texel it samples.
    ///
    /// Mirrors the fragment shader: pixel centres are scaled by
    /// `source / target` and floored.
    pub fn source_texel(&self, x: u32, y: u32) -> (u32, u32) {
        let scale_x = self.source.width as f32 / self.target.width.max(1) as f32;
        let scale_y = self.source.height as f32 / self.target.height.max(1) as f32;
        let local_x = (x as f32 + 0.5 - self.target.x as f32) * scale_x;
        let local_y = (y as f32 + 0.5 - self.target.y as f32) * scale_y;
        (
            self.source.x + local_x.floor().max(0.0) as u32,
            self.source.y + local_y.floor().max(0.0) as u32,
        )
    }
}

/// Where the next draw call lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DrawDestination {
    /// The visible surface (a window swapchain, or the headless display texture).
    #[default]
    Surface,
    /// An offscreen texture selected through a render target set.
    Texture(TextureId),
}

/// Identifies which backend implementation sits behind a context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Wgpu,
    Software,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Wgpu => f.write_str("wgpu"),
            BackendKind::Software => f.write_str("software"),
        }
    }
}

/// GPU power preference forwarded to adapter selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum GpuPowerPreference {
    Low,
    #[default]
    High,
}

/// File formats supported by the still export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// 8-bit PNG, channels clamped to `[0, 1]`.
    #[default]
    Png,
    /// 32-bit float OpenEXR, values written untouched.
    Exr,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Png => "png",
            ExportFormat::Exr => "exr",
        }
    }
}

/// Summary of the adapter a wgpu backend ended up on.
#[derive(Clone, Debug)]
pub struct AdapterProfile {
    pub name: String,
    pub backend: wgpu::Backend,
    pub device_type: wgpu::DeviceType,
}

impl AdapterProfile {
    pub(crate) fn from_wgpu(info: &wgpu::AdapterInfo) -> Self {
        Self {
            name: info.name.clone(),
            backend: info.backend,
            device_type: info.device_type,
        }
    }

    pub fn is_software(&self) -> bool {
        matches!(self.device_type, wgpu::DeviceType::Cpu)
            || self.name.to_ascii_lowercase().contains("llvmpipe")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_region_maps_pixels_onto_themselves() {
        let region = QuadRegion::same(Rect::from_size(7, 5));
        assert_eq!(region.source_texel(0, 0), (0, 0));
        assert_eq!(region.source_texel(6, 4), (6, 4));
    }

    #[test]
    fn stretched_region_scales_into_source() {
        let region = QuadRegion::stretched(Rect::from_size(8, 8), Rect::from_size(4, 2));
        assert_eq!(region.source_texel(0, 0), (0, 0));
        assert_eq!(region.source_texel(7, 7), (3, 1));
        assert_eq!(region.source_texel(3, 3), (1, 0));
    }

    #[test]
    fn rect_fit_checks_both_axes() {
        let rect = Rect::new(2, 2, 4, 4);
        assert!(rect.fits_within(6, 6));
        assert!(!rect.fits_within(5, 6));
        assert!(rect.contains(5, 5));
        assert!(!rect.contains(6, 5));
    }
}
