use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, Rgba, Rgba32FImage, RgbaImage};

use crate::error::{RenderError, RenderResult};
use crate::types::ExportFormat;

/// Destination for a still export of one render target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub path: PathBuf,
    pub format: ExportFormat,
}

impl ExportRequest {
    pub fn new(path: impl Into<PathBuf>, format: ExportFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

/// Writes row-major RGBA float texels to disk.
///
/// PNG clamps each channel to `[0, 1]` and quantizes to 8 bits; EXR stores
/// the floats untouched.
pub fn export_texels(
    request: &ExportRequest,
    width: u32,
    height: u32,
    texels: &[[f32; 4]],
) -> RenderResult<PathBuf> {
    if texels.len() != width as usize * height as usize {
        return Err(RenderError::Export(format!(
            "{} texels do not describe a {width}x{height} image",
            texels.len()
        )));
    }
    let extension = request.path.extension().and_then(|ext| ext.to_str());
    if !extension.is_some_and(|ext| ext.eq_ignore_ascii_case(request.format.extension())) {
        tracing::warn!(
            path = %request.path.display(),
            format = ?request.format,
            "export path extension does not match the still format"
        );
    }
    if let Some(parent) = request.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|err| {
                RenderError::Export(format!("failed to create {}: {err}", parent.display()))
            })?;
        }
    }

    let result = match request.format {
        ExportFormat::Png => {
            let image = RgbaImage::from_fn(width, height, |x, y| {
                let texel = texels[(y * width + x) as usize];
                Rgba(texel.map(|value| (value.clamp(0.0, 1.0) * 255.0).round() as u8))
            });
            image.save_with_format(&request.path, ImageFormat::Png)
        }
        ExportFormat::Exr => {
            let raw: Vec<f32> = texels.iter().flatten().copied().collect();
            let image = Rgba32FImage::from_raw(width, height, raw).ok_or_else(|| {
                RenderError::Export("texel buffer does not match image size".to_string())
            })?;
            DynamicImage::ImageRgba32F(image).save_with_format(&request.path, ImageFormat::OpenExr)
        }
    };
    result.map_err(|err| {
        RenderError::Export(format!("failed to write {}: {err}", request.path.display()))
    })?;

    tracing::info!(path = %request.path.display(), format = ?request.format, width, height, "exported still");
    Ok(request.path.clone())
}

/// Loads an exported still back as RGBA floats (PNG channels divided by 255).
pub fn load_texels(path: &Path) -> RenderResult<(u32, u32, Vec<[f32; 4]>)> {
    let image = image::open(path)
        .map_err(|err| RenderError::Export(format!("failed to read {}: {err}", path.display())))?
        .to_rgba32f();
    let (width, height) = image.dimensions();
    let texels = image.pixels().map(|pixel| pixel.0).collect();
    Ok((width, height, texels))
}
