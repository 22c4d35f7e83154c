use std::cell::Cell;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use calibconfig::{CalibConfig, DEFAULT_WINDOW_SIZE};
use renderer::{GraphicsContext, RenderError, WgpuBackend};
use scheduler::{AccumulationPipeline, PipelineOptions, SchedulerError, TickOutcome};
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::run::{wgpu_options, BoxedSource};

/// Pipeline plus the window its surface was created from. Fields drop in
/// order, so the surface is released before the window.
struct PreviewState {
    pipeline: AccumulationPipeline<BoxedSource>,
    window: Arc<Window>,
}

/// Runs the accumulation in a preview window until it is closed.
///
/// Escape or closing the window shuts the pipeline down; `R` restarts the
/// accumulation from the first frame.
pub fn run_window(
    config: &CalibConfig,
    source: BoxedSource,
    options: PipelineOptions,
) -> Result<()> {
    let event_loop =
        EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let size = config.render.window_size.unwrap_or(DEFAULT_WINDOW_SIZE);
    let window = WindowBuilder::new()
        .with_title("backsub")
        .with_inner_size(PhysicalSize::new(size.width, size.height))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create preview window: {err}"))?;
    let window = Arc::new(window);

    let inner = window.inner_size();
    let backend = WgpuBackend::for_window(
        window.as_ref(),
        inner.width,
        inner.height,
        wgpu_options(config),
    )
    .context("failed to initialise window renderer")?;
    let profile = backend.adapter_profile();
    tracing::info!(adapter = %profile.name, backend = ?profile.backend, "preview window ready");

    let pipeline = AccumulationPipeline::new(GraphicsContext::new(Box::new(backend)), source, options)
        .context("failed to set up accumulation pipeline")?;
    let shutdown = pipeline.shutdown_signal();
    let mut state = PreviewState { pipeline, window };
    state.window.request_redraw();

    let failed = Cell::new(false);
    let run_result = event_loop.run(|event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == state.window.id() => match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                shutdown.request();
                elwt.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state != ElementState::Pressed || event.repeat {
                    return;
                }
                match event.logical_key {
                    Key::Named(NamedKey::Escape) => {
                        shutdown.request();
                        elwt.exit();
                    }
                    Key::Character(ref value) if value.as_str().eq_ignore_ascii_case("r") => {
                        if let Err(err) = state.pipeline.restart() {
                            tracing::error!(error = %err, "failed to restart accumulation");
                        }
                    }
                    _ => {}
                }
            }
            WindowEvent::Resized(new_size) => {
                state
                    .pipeline
                    .context_mut()
                    .resize_surface(new_size.width, new_size.height);
                state.window.request_redraw();
            }
            WindowEvent::RedrawRequested => match state.pipeline.tick() {
                Ok(TickOutcome::ShutDown) => elwt.exit(),
                Ok(_) => {}
                Err(SchedulerError::Render(RenderError::Surface(message))) => {
                    tracing::warn!(%message, "surface error; retrying next frame");
                }
                Err(err) => {
                    tracing::error!(error = %err, "accumulation failed");
                    failed.set(true);
                    elwt.exit();
                }
            },
            _ => {}
        },
        Event::AboutToWait => {
            state.window.request_redraw();
            elwt.set_control_flow(ControlFlow::Wait);
        }
        Event::LoopExiting => {
            let stats = state.pipeline.stats();
            tracing::info!(
                ticks = stats.ticks,
                render_passes = stats.render_passes,
                presents = stats.presents,
                restarts = stats.restarts,
                "preview closed"
            );
            if let Err(err) = state.pipeline.teardown() {
                tracing::warn!(error = %err, "failed to release render targets");
            }
        }
        _ => {}
    });

    run_result.map_err(|err| anyhow!("window event loop error: {err}"))?;
    if failed.get() {
        bail!("accumulation failed; see the log for details");
    }
    Ok(())
}
