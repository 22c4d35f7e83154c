use std::time::Duration;

use anyhow::{bail, Context, Result};
use calibconfig::{
    BackendChoice, CalibConfig, CaptureSection, OutputFormat, OutputSection, PowerSetting,
};
use framesource::{CaptureSource, FileSequence, FrameSource};
use renderer::{
    ExportFormat, ExportRequest, GpuPowerPreference, GraphicsContext, WgpuBackend, WgpuOptions,
};
use scheduler::{AccumulationPipeline, PipelineOptions, TickOutcome};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, RunArgs};
use crate::{verify, window};

const DEFAULT_LOG_FILTER: &str = "warn,backsub=info,renderer=info,scheduler=info,framesource=info,naga=error,wgpu=error,wgpu_core=error,wgpu_hal=error,winit=error";

/// Sleep between ticks while the source has no frame ready.
const WAIT_BACKOFF: Duration = Duration::from_millis(2);

pub type BoxedSource = Box<dyn FrameSource>;

pub fn run(cli: Cli) -> Result<()> {
    initialise_tracing();
    match cli.command {
        Some(Command::Verify(args)) => verify::run(args, cli.run.config.as_deref()),
        None => run_pipeline(&cli.run),
    }
}

fn initialise_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_pipeline(args: &RunArgs) -> Result<()> {
    let config = resolve_config(args)?;
    let source = open_source(&config)?;
    let options = pipeline_options(&config, source.frame_size());
    tracing::info!(
        frames = options.frames,
        source = %source.describe(),
        backend = ?config.render.backend,
        window = config.render.window,
        "starting accumulation"
    );

    if config.render.window {
        if config.render.backend == BackendChoice::Software {
            bail!("the preview window needs the wgpu backend");
        }
        return window::run_window(&config, source, options);
    }

    let (width, height) = options.target_size.unwrap_or(source.frame_size());
    let ctx = headless_context(&config, width, height)?;
    let mut pipeline = AccumulationPipeline::new(ctx, source, options)
        .context("failed to set up accumulation pipeline")?;
    drive_to_display(&mut pipeline)?;
    pipeline.teardown().context("failed to release render targets")?;
    Ok(())
}

/// Loads the optional config file and layers the CLI flags on top.
pub(crate) fn resolve_config(args: &RunArgs) -> Result<CalibConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => CalibConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => CalibConfig::default(),
    };
    apply_overrides(&mut config, args);
    config.validate().context("invalid run configuration")?;
    Ok(config)
}

fn apply_overrides(config: &mut CalibConfig, args: &RunArgs) {
    if let Some(frames) = args.frames {
        config.run.frames = frames;
    }
    if let Some(source) = args.source.as_ref() {
        config.run.source = Some(source.clone());
    }
    if let Some(size) = args.size {
        config.render.target_size = Some(size);
    }
    if let Some(backend) = args.backend {
        config.render.backend = backend;
    }
    if args.window {
        config.render.window = true;
    }
    if let Some(size) = args.window_size {
        config.render.window_size = Some(size);
    }
    if let Some(power) = args.power {
        config.render.power = power;
    }
    if let Some(path) = args.export.as_ref() {
        config.output = Some(OutputSection {
            path: path.clone(),
            format: args.format,
        });
    } else if let Some(format) = args.format {
        match config.output.as_mut() {
            Some(output) => output.format = Some(format),
            None => tracing::warn!(?format, "--format given without an export path; ignoring"),
        }
    }
    if let Some(interval) = args.capture_interval {
        config.capture = Some(CaptureSection { interval });
    }
}

fn open_source(config: &CalibConfig) -> Result<BoxedSource> {
    let dir = config
        .run
        .source
        .as_ref()
        .context("no frame source; pass --source or set run.source")?;
    let sequence = FileSequence::open(dir, None)
        .with_context(|| format!("failed to open frames in {}", dir.display()))?;
    match config.capture_interval() {
        Some(interval) => {
            let capture =
                CaptureSource::spawn(sequence, interval).context("failed to start capture thread")?;
            Ok(Box::new(capture))
        }
        None => Ok(Box::new(sequence)),
    }
}

pub(crate) fn pipeline_options(config: &CalibConfig, frame_size: (u32, u32)) -> PipelineOptions {
    let target_size = config
        .render
        .target_size
        .map(|size| (size.width, size.height))
        .unwrap_or(frame_size);
    PipelineOptions {
        frames: config.run.frames,
        target_size: Some(target_size),
        export: config.output.as_ref().map(|output| {
            ExportRequest::new(output.path.clone(), export_format(output.resolved_format()))
        }),
    }
}

fn headless_context(config: &CalibConfig, width: u32, height: u32) -> Result<GraphicsContext> {
    match config.render.backend {
        BackendChoice::Software => Ok(GraphicsContext::software(width, height)),
        BackendChoice::Wgpu => {
            let backend = WgpuBackend::headless(width, height, wgpu_options(config))
                .context("failed to initialise headless GPU backend")?;
            let profile = backend.adapter_profile();
            tracing::info!(adapter = %profile.name, backend = ?profile.backend, "using GPU adapter");
            Ok(GraphicsContext::new(Box::new(backend)))
        }
    }
}

pub(crate) fn wgpu_options(config: &CalibConfig) -> WgpuOptions {
    WgpuOptions {
        power: match config.render.power {
            PowerSetting::Low => GpuPowerPreference::Low,
            PowerSetting::High => GpuPowerPreference::High,
        },
    }
}

pub(crate) fn export_format(format: OutputFormat) -> ExportFormat {
    match format {
        OutputFormat::Png => ExportFormat::Png,
        OutputFormat::Exr => ExportFormat::Exr,
    }
}

fn drive_to_display(pipeline: &mut AccumulationPipeline<BoxedSource>) -> Result<()> {
    loop {
        match pipeline.tick().context("accumulation step failed")? {
            TickOutcome::Advanced(_) => {}
            TickOutcome::Waiting(_) => std::thread::sleep(WAIT_BACKOFF),
            TickOutcome::Displayed { .. } => break,
            TickOutcome::ShutDown => bail!("pipeline shut down before reaching steady display"),
        }
    }
    let stats = pipeline.stats();
    tracing::info!(
        ticks = stats.ticks,
        uploads = stats.uploads,
        render_passes = stats.render_passes,
        waits = stats.waits,
        exported = ?pipeline.exported(),
        "headless run finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use calibconfig::Size;
    use std::io::Write;

    const SAMPLE: &str = r#"
version = 1

[run]
frames = 8
source = "frames"

[render]
backend = "software"
target_size = "64x64"

[output]
path = "out/std.png"
"#;

    fn write_config() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file
    }

    #[test]
    fn flags_override_config_values() {
        let file = write_config();
        let args = RunArgs {
            config: Some(file.path().to_path_buf()),
            frames: Some(4),
            export: Some("stills/std.exr".into()),
            ..RunArgs::default()
        };
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.run.frames, 4);
        assert_eq!(config.render.backend, BackendChoice::Software);
        assert_eq!(config.render.target_size, Some(Size::new(64, 64)));

        let options = pipeline_options(&config, (32, 32));
        assert_eq!(options.target_size, Some((64, 64)));
        let export = options.export.unwrap();
        assert_eq!(export.format, ExportFormat::Exr);
    }

    #[test]
    fn target_size_defaults_to_frame_size() {
        let config = resolve_config(&RunArgs::default()).unwrap();
        let options = pipeline_options(&config, (40, 30));
        assert_eq!(options.target_size, Some((40, 30)));
        assert!(options.export.is_none());
    }

    #[test]
    fn zero_frames_from_flags_is_rejected() {
        let args = RunArgs {
            frames: Some(0),
            ..RunArgs::default()
        };
        assert!(resolve_config(&args).is_err());
    }

    #[test]
    fn contradicting_format_flag_is_rejected() {
        let args = RunArgs {
            export: Some("std.png".into()),
            format: Some(OutputFormat::Exr),
            ..RunArgs::default()
        };
        assert!(resolve_config(&args).is_err());
    }
}
