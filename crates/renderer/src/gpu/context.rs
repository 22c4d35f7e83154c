use anyhow::{anyhow, Context as AnyhowContext, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::types::{AdapterProfile, GpuPowerPreference};

/// Swapchain state for a windowed backend.
pub(crate) struct SurfaceState {
    pub surface: wgpu::Surface<'static>,
    pub config: wgpu::SurfaceConfiguration,
}

impl SurfaceState {
    pub(crate) fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(device, &self.config);
    }
}

/// Instance, adapter and device wiring shared by the headless and windowed backends.
pub(crate) struct GpuContext {
    pub _instance: wgpu::Instance,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub limits: wgpu::Limits,
    pub adapter_profile: AdapterProfile,
    pub surface: Option<SurfaceState>,
}

impl GpuContext {
    pub(crate) fn headless(power: GpuPowerPreference) -> Result<Self> {
        let instance = create_instance();
        let adapter = request_adapter(&instance, power, None)?;
        let (device, queue, limits, adapter_profile) = request_device(&adapter)?;
        Ok(Self {
            _instance: instance,
            device,
            queue,
            limits,
            adapter_profile,
            surface: None,
        })
    }

    pub(crate) fn for_window<T>(
        target: &T,
        width: u32,
        height: u32,
        power: GpuPowerPreference,
    ) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let instance = create_instance();

        let window_handle = target
            .window_handle()
            .map_err(|err| anyhow!("failed to acquire window handle: {err}"))?;
        let display_handle = target
            .display_handle()
            .map_err(|err| anyhow!("failed to acquire display handle: {err}"))?;

        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display_handle.as_raw(),
                raw_window_handle: window_handle.as_raw(),
            })
        }
        .context("failed to create rendering surface")?;

        let adapter = request_adapter(&instance, power, Some(&surface))?;
        let (device, queue, limits, adapter_profile) = request_device(&adapter)?;

        let max_dimension = limits.max_texture_dimension_2d;
        let width = width.max(1);
        let height = height.max(1);
        if width > max_dimension || height > max_dimension {
            anyhow::bail!(
                "GPU max texture dimension is {max_dimension}, requested surface is {width}x{height}"
            );
        }

        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .context("surface reports no supported formats")?;
        if format.is_srgb() {
            tracing::warn!(
                ?format,
                "no linear (non-sRGB) surface format available; standard deviations will be gamma encoded"
            );
        }

        let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT;
        if surface_caps.usages.contains(wgpu::TextureUsages::COPY_SRC) {
            usage |= wgpu::TextureUsages::COPY_SRC;
        } else {
            tracing::debug!("surface does not advertise COPY_SRC; surface readback disabled");
        }

        let present_mode = surface_caps
            .present_modes
            .iter()
            .copied()
            .find(|mode| *mode == wgpu::PresentMode::Fifo)
            .or_else(|| surface_caps.present_modes.first().copied())
            .unwrap_or(wgpu::PresentMode::Fifo);
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let config = wgpu::SurfaceConfiguration {
            usage,
            format,
            width,
            height,
            present_mode,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        tracing::debug!(?format, ?present_mode, width, height, "configured surface");

        Ok(Self {
            _instance: instance,
            device,
            queue,
            limits,
            adapter_profile,
            surface: Some(SurfaceState { surface, config }),
        })
    }
}

fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: wgpu::InstanceFlags::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        backend_options: wgpu::BackendOptions::default(),
    })
}

fn request_adapter(
    instance: &wgpu::Instance,
    power: GpuPowerPreference,
    surface: Option<&wgpu::Surface<'static>>,
) -> Result<wgpu::Adapter> {
    let power_preference = match power {
        GpuPowerPreference::Low => wgpu::PowerPreference::LowPower,
        GpuPowerPreference::High => wgpu::PowerPreference::HighPerformance,
    };
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference,
        compatible_surface: surface,
        force_fallback_adapter: false,
    }))
    .context("failed to find a suitable GPU adapter")
}

fn request_device(
    adapter: &wgpu::Adapter,
) -> Result<(wgpu::Device, wgpu::Queue, wgpu::Limits, AdapterProfile)> {
    let adapter_info = adapter.get_info();
    let limits = adapter.limits();
    let adapter_profile = AdapterProfile::from_wgpu(&adapter_info);
    let is_software = adapter_profile.is_software();
    tracing::debug!(
        name = %adapter_profile.name,
        backend = ?adapter_profile.backend,
        device_type = ?adapter_profile.device_type,
        is_software,
        "selected GPU adapter"
    );
    if is_software {
        tracing::warn!(
            name = %adapter_profile.name,
            "software rasterizer detected; accumulation will be slow"
        );
    }

    let float_features = adapter.get_texture_format_features(wgpu::TextureFormat::Rgba32Float);
    if !float_features
        .allowed_usages
        .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
    {
        anyhow::bail!(
            "adapter '{}' cannot render into Rgba32Float targets",
            adapter_profile.name
        );
    }

    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("backsub device"),
        required_features: wgpu::Features::empty(),
        required_limits: limits.clone(),
        memory_hints: wgpu::MemoryHints::MemoryUsage,
        trace: wgpu::Trace::default(),
    }))
    .context("failed to create GPU device")?;

    Ok((device, queue, limits, adapter_profile))
}
