use std::path::PathBuf;
use std::time::Duration;

use calibconfig::{BackendChoice, OutputFormat, PowerSetting, Size, DEFAULT_FRAMES};
use clap::{Parser, Subcommand};

use crate::reference::VerifyMode;

#[derive(Parser, Debug)]
#[command(
    name = "backsub",
    author,
    version,
    about = "Per-pixel running mean and standard deviation of a frame sequence, on the GPU",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// TOML run configuration; CLI flags override its values.
    #[arg(long, value_name = "FILE", env = "BACKSUB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of frames to accumulate (N).
    #[arg(long, value_name = "N")]
    pub frames: Option<u32>,

    /// Directory of frames, replayed in file-name order.
    #[arg(long, value_name = "DIR")]
    pub source: Option<PathBuf>,

    /// Allocated render target size (e.g. `512x512`); defaults to the frame size.
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub size: Option<Size>,

    /// Graphics backend: `wgpu` (default) or `software`.
    #[arg(long, value_name = "BACKEND", value_parser = parse_backend)]
    pub backend: Option<BackendChoice>,

    /// Show the result in a preview window instead of exiting after export.
    #[arg(long)]
    pub window: bool,

    /// Preview window size (e.g. `800x600`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size)]
    pub window_size: Option<Size>,

    /// Write the standard deviation still to this path.
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,

    /// Still format: `png` or `exr`; inferred from the export extension when omitted.
    #[arg(long, value_name = "FORMAT", value_parser = parse_output_format)]
    pub format: Option<OutputFormat>,

    /// Poll the source on a background thread at this interval (e.g. `33ms`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub capture_interval: Option<Duration>,

    /// GPU adapter preference: `low` or `high`.
    #[arg(long, value_name = "POWER", value_parser = parse_power)]
    pub power: Option<PowerSetting>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Recompute statistics on the CPU and optionally compare with an export.
    Verify(VerifyArgs),
}

#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Directory of frames, read in file-name order.
    #[arg(long, value_name = "DIR")]
    pub source: PathBuf,

    /// Number of frames to use; the sequence loops if it holds fewer.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_FRAMES)]
    pub frames: u32,

    /// Statistic to compute: `mean`, `stddev`, `xi`, `cdi`, `bi` or `ai`.
    #[arg(long, value_name = "MODE", value_parser = parse_verify_mode)]
    pub mode: VerifyMode,

    /// Write the computed image (PNG or EXR by extension).
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Report the maximum absolute error against this exported image.
    #[arg(long, value_name = "PATH")]
    pub compare: Option<PathBuf>,

    /// Fail when the compared error exceeds this bound.
    #[arg(long, value_name = "EPSILON", requires = "compare")]
    pub tolerance: Option<f32>,

    /// Divisor applied to the chromaticity distortion measures; falls back to
    /// `verify.distortion_scale` in the config, then to 10.
    #[arg(long, value_name = "F")]
    pub distortion_scale: Option<f32>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_size(value: &str) -> Result<Size, String> {
    value.parse()
}

pub fn parse_backend(value: &str) -> Result<BackendChoice, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("backend must not be empty".to_string());
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "wgpu" | "gpu" => Ok(BackendChoice::Wgpu),
        "software" | "cpu" => Ok(BackendChoice::Software),
        other => Err(format!("unknown backend '{other}'; expected wgpu or software")),
    }
}

pub fn parse_power(value: &str) -> Result<PowerSetting, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "low" | "low-power" => Ok(PowerSetting::Low),
        "high" | "high-performance" => Ok(PowerSetting::High),
        other => Err(format!("unknown power preference '{other}'; expected low or high")),
    }
}

pub fn parse_output_format(value: &str) -> Result<OutputFormat, String> {
    value.parse()
}

pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(value.trim())
        .map_err(|err| format!("invalid duration '{value}': {err}"))?;
    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}

pub fn parse_verify_mode(value: &str) -> Result<VerifyMode, String> {
    value.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "backsub",
            "--frames",
            "8",
            "--source",
            "frames",
            "--size",
            "640x480",
            "--backend",
            "software",
            "--export",
            "out/std.exr",
            "--capture-interval",
            "40ms",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.frames, Some(8));
        assert_eq!(cli.run.size, Some(Size::new(640, 480)));
        assert_eq!(cli.run.backend, Some(BackendChoice::Software));
        assert_eq!(cli.run.capture_interval, Some(Duration::from_millis(40)));
    }

    #[test]
    fn verify_requires_a_mode() {
        assert!(Cli::try_parse_from(["backsub", "verify", "--source", "frames"]).is_err());
        let cli = Cli::try_parse_from([
            "backsub", "verify", "--source", "frames", "--mode", "CDi",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Verify(args)) => {
                assert_eq!(args.mode, VerifyMode::Cdi);
                assert_eq!(args.frames, DEFAULT_FRAMES);
                assert_eq!(args.distortion_scale, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse_backend("vulkan").is_err());
        assert!(parse_duration("0s").is_err());
        assert!(parse_size("0x10").is_err());
        assert!(parse_power("medium").is_err());
    }
}
