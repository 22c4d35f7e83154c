//! wgpu implementation of [`Backend`](crate::Backend).
//!
//! - `context` owns instance/adapter/device wiring and, for windowed runs, the
//!   surface configuration.
//! - `pipeline` compiles the calibration GLSL into one pipeline for float
//!   targets and one for the display format.
//! - `uniforms` mirrors the std140 parameter block.
//!
//! Every draw, clear and copy is submitted immediately, in call order.

mod context;
mod pipeline;
mod uniforms;

use std::collections::HashMap;

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::context::{Backend, DrawCall};
use crate::error::{RenderError, RenderResult};
use crate::types::{
    AdapterProfile, BackendKind, DrawDestination, GpuPowerPreference, Rect, TextureDesc,
    TextureId,
};

use self::context::GpuContext;
use self::pipeline::CalibratePipelines;
use self::uniforms::CalibrateUniforms;

const HEADLESS_DISPLAY_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Knobs forwarded to adapter selection.
#[derive(Clone, Copy, Debug, Default)]
pub struct WgpuOptions {
    pub power: GpuPowerPreference,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

impl GpuTexture {
    fn new(
        device: &wgpu::Device,
        label: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            format,
        }
    }
}

/// GPU backend drawing either into a window surface or, headless, into an
/// off-screen RGBA8 display texture.
pub struct WgpuBackend {
    gpu: GpuContext,
    pipelines: CalibratePipelines,
    textures: HashMap<TextureId, GpuTexture>,
    placeholder: GpuTexture,
    display: Option<GpuTexture>,
    frame: Option<wgpu::SurfaceTexture>,
    surface_size: (u32, u32),
}

impl WgpuBackend {
    /// Backend without a window; the "surface" is an off-screen texture.
    pub fn headless(width: u32, height: u32, options: WgpuOptions) -> Result<Self> {
        let gpu = GpuContext::headless(options.power)?;
        let width = width.max(1);
        let height = height.max(1);
        let display = GpuTexture::new(
            &gpu.device,
            "headless display",
            width,
            height,
            HEADLESS_DISPLAY_FORMAT,
        );
        Ok(Self::assemble(gpu, HEADLESS_DISPLAY_FORMAT, Some(display), (width, height)))
    }

    /// Backend presenting to `target`'s window surface.
    pub fn for_window<T>(target: &T, width: u32, height: u32, options: WgpuOptions) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let gpu = GpuContext::for_window(target, width, height, options.power)?;
        let (format, size) = match gpu.surface.as_ref() {
            Some(state) => (state.config.format, (state.config.width, state.config.height)),
            None => anyhow::bail!("windowed backend created without a surface"),
        };
        Ok(Self::assemble(gpu, format, None, size))
    }

    fn assemble(
        gpu: GpuContext,
        display_format: wgpu::TextureFormat,
        display: Option<GpuTexture>,
        surface_size: (u32, u32),
    ) -> Self {
        let pipelines = CalibratePipelines::new(&gpu.device, display_format);
        let placeholder = GpuTexture::new(
            &gpu.device,
            "unbound input placeholder",
            1,
            1,
            wgpu::TextureFormat::Rgba32Float,
        );
        Self {
            gpu,
            pipelines,
            textures: HashMap::new(),
            placeholder,
            display,
            frame: None,
            surface_size,
        }
    }

    pub fn adapter_profile(&self) -> &AdapterProfile {
        &self.gpu.adapter_profile
    }

    fn texture(&self, id: TextureId) -> RenderResult<&GpuTexture> {
        self.textures.get(&id).ok_or(RenderError::UnknownTexture(id))
    }

    /// Acquires the swapchain image for this frame if it is not held yet.
    fn acquire_frame(&mut self) -> RenderResult<()> {
        if self.frame.is_some() || self.display.is_some() {
            return Ok(());
        }
        let Some(state) = self.gpu.surface.as_mut() else {
            return Err(RenderError::Surface("no surface configured".to_string()));
        };
        let frame = match state.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                tracing::debug!("surface lost or outdated; reconfiguring");
                state.surface.configure(&self.gpu.device, &state.config);
                state
                    .surface
                    .get_current_texture()
                    .map_err(|err| RenderError::Surface(format!("{err:?}")))?
            }
            Err(err) => return Err(RenderError::Surface(format!("{err:?}"))),
        };
        self.frame = Some(frame);
        Ok(())
    }

    /// View and format of a destination. Surface frames must be acquired first.
    fn destination_view(
        &self,
        destination: DrawDestination,
    ) -> RenderResult<(wgpu::TextureView, wgpu::TextureFormat)> {
        match destination {
            DrawDestination::Texture(id) => {
                let texture = self.texture(id)?;
                Ok((texture.view.clone(), texture.format))
            }
            DrawDestination::Surface => {
                if let Some(display) = &self.display {
                    return Ok((display.view.clone(), display.format));
                }
                let frame = self
                    .frame
                    .as_ref()
                    .ok_or_else(|| RenderError::Surface("no frame acquired".to_string()))?;
                Ok((
                    frame
                        .texture
                        .create_view(&wgpu::TextureViewDescriptor::default()),
                    frame.texture.format(),
                ))
            }
        }
    }

    fn read_back(
        &self,
        texture: &wgpu::Texture,
        format: wgpu::TextureFormat,
        rect: Rect,
    ) -> RenderResult<Vec<[f32; 4]>> {
        let bytes_per_texel = match format {
            wgpu::TextureFormat::Rgba32Float => 16,
            wgpu::TextureFormat::Rgba8Unorm
            | wgpu::TextureFormat::Rgba8UnormSrgb
            | wgpu::TextureFormat::Bgra8Unorm
            | wgpu::TextureFormat::Bgra8UnormSrgb => 4,
            other => {
                return Err(RenderError::Readback(format!(
                    "unsupported readback format {other:?}"
                )))
            }
        };
        if rect.is_empty() {
            return Ok(Vec::new());
        }

        let unpadded = rect.width * bytes_per_texel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;
        let buffer = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback buffer"),
            size: padded as u64 * rect.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: rect.x,
                    y: rect.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(rect.height),
                },
            },
            wgpu::Extent3d {
                width: rect.width,
                height: rect.height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.gpu
            .device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| RenderError::Readback(err.to_string()))?;
        receiver
            .recv()
            .map_err(|err| RenderError::Readback(err.to_string()))?
            .map_err(|err| RenderError::Readback(err.to_string()))?;

        let data = slice.get_mapped_range();
        let mut texels = Vec::with_capacity(rect.area());
        for row in 0..rect.height as usize {
            let start = row * padded as usize;
            let row_bytes = &data[start..start + unpadded as usize];
            for chunk in row_bytes.chunks_exact(bytes_per_texel as usize) {
                texels.push(decode_texel(format, chunk));
            }
        }
        drop(data);
        buffer.unmap();
        Ok(texels)
    }

    fn submit_pass(
        &self,
        label: &str,
        view: &wgpu::TextureView,
        load: wgpu::LoadOp<wgpu::Color>,
        draw: Option<(&wgpu::RenderPipeline, &wgpu::BindGroup, Rect)>,
    ) {
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if let Some((pipeline, textures, rect)) = draw {
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &self.pipelines.uniform_bind_group, &[]);
                pass.set_bind_group(1, textures, &[]);
                pass.set_viewport(
                    rect.x as f32,
                    rect.y as f32,
                    rect.width as f32,
                    rect.height as f32,
                    0.0,
                    1.0,
                );
                pass.set_scissor_rect(rect.x, rect.y, rect.width, rect.height);
                pass.draw(0..3, 0..1);
            }
        }
        self.gpu.queue.submit(Some(encoder.finish()));
    }
}

fn decode_texel(format: wgpu::TextureFormat, bytes: &[u8]) -> [f32; 4] {
    match format {
        wgpu::TextureFormat::Rgba32Float => std::array::from_fn(|c| {
            let offset = c * 4;
            f32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])
        }),
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => [
            bytes[2] as f32 / 255.0,
            bytes[1] as f32 / 255.0,
            bytes[0] as f32 / 255.0,
            bytes[3] as f32 / 255.0,
        ],
        _ => std::array::from_fn(|c| bytes[c] as f32 / 255.0),
    }
}

impl Backend for WgpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Wgpu
    }

    fn max_color_attachments(&self) -> u32 {
        self.gpu.limits.max_color_attachments
    }

    fn max_texture_dimension(&self) -> u32 {
        self.gpu.limits.max_texture_dimension_2d
    }

    fn create_texture(&mut self, id: TextureId, desc: &TextureDesc) -> RenderResult<()> {
        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = GpuTexture::new(
            device,
            &desc.label,
            desc.width,
            desc.height,
            desc.format.to_wgpu(),
        );
        let out_of_memory = pollster::block_on(device.pop_error_scope());
        let invalid = pollster::block_on(device.pop_error_scope());
        if let Some(err) = out_of_memory.or(invalid) {
            return Err(RenderError::Allocation {
                label: desc.label.clone(),
                reason: err.to_string(),
            });
        }
        self.textures.insert(id, texture);
        Ok(())
    }

    fn destroy_texture(&mut self, id: TextureId) {
        if let Some(texture) = self.textures.remove(&id) {
            texture.texture.destroy();
        }
    }

    fn upload_rgba8(
        &mut self,
        id: TextureId,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> RenderResult<()> {
        let texture = self.texture(id)?;
        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn clear(&mut self, destination: DrawDestination, color: [f32; 4]) -> RenderResult<()> {
        if destination == DrawDestination::Surface {
            self.acquire_frame()?;
        }
        let (view, _) = self.destination_view(destination)?;
        let clear = wgpu::Color {
            r: color[0] as f64,
            g: color[1] as f64,
            b: color[2] as f64,
            a: color[3] as f64,
        };
        self.submit_pass("clear", &view, wgpu::LoadOp::Clear(clear), None);
        Ok(())
    }

    fn draw_quad(&mut self, call: &DrawCall) -> RenderResult<()> {
        if call.destination == DrawDestination::Surface {
            self.acquire_frame()?;
        }
        let (view, format) = self.destination_view(call.destination)?;
        let pipeline = if format == wgpu::TextureFormat::Rgba32Float {
            &self.pipelines.offscreen
        } else if format == self.pipelines.display_format {
            &self.pipelines.display
        } else {
            return Err(RenderError::Surface(format!(
                "no pipeline renders into {format:?}"
            )));
        };

        let mut views = [&self.placeholder.view; 3];
        for (slot, input) in call.inputs.iter().enumerate() {
            if let Some(id) = input {
                views[slot] = &self.texture(*id)?.view;
            }
        }
        let textures = self.pipelines.texture_bind_group(&self.gpu.device, views);

        let uniforms = CalibrateUniforms::from_call(call);
        self.gpu.queue.write_buffer(
            &self.pipelines.uniform_buffer,
            0,
            bytemuck::bytes_of(&uniforms),
        );
        self.submit_pass(
            "calibrate pass",
            &view,
            wgpu::LoadOp::Load,
            Some((pipeline, &textures, call.region.target)),
        );
        Ok(())
    }

    fn read_texture(&mut self, id: TextureId, rect: Rect) -> RenderResult<Vec<[f32; 4]>> {
        let texture = self.texture(id)?;
        self.read_back(&texture.texture, texture.format, rect)
    }

    fn read_surface(&mut self, rect: Rect) -> RenderResult<Vec<[f32; 4]>> {
        if let Some(display) = &self.display {
            return self.read_back(&display.texture, display.format, rect);
        }
        let copyable = self
            .gpu
            .surface
            .as_ref()
            .is_some_and(|state| state.config.usage.contains(wgpu::TextureUsages::COPY_SRC));
        match (&self.frame, copyable) {
            (Some(frame), true) => self.read_back(&frame.texture, frame.texture.format(), rect),
            (None, _) => Err(RenderError::Readback(
                "no surface frame has been drawn".to_string(),
            )),
            (Some(_), false) => Err(RenderError::Readback(
                "surface does not support copies".to_string(),
            )),
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface_size = (width, height);
        if self.display.is_some() {
            self.display = Some(GpuTexture::new(
                &self.gpu.device,
                "headless display",
                width,
                height,
                HEADLESS_DISPLAY_FORMAT,
            ));
            return;
        }
        self.frame = None;
        if let Some(state) = self.gpu.surface.as_mut() {
            state.resize(&self.gpu.device, width, height);
        }
    }

    fn present(&mut self) -> RenderResult<()> {
        if let Some(frame) = self.frame.take() {
            frame.present();
        }
        Ok(())
    }
}
