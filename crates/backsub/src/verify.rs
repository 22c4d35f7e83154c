use std::path::Path;

use anyhow::{bail, Context, Result};
use calibconfig::{CalibConfig, OutputFormat, DEFAULT_DISTORTION_SCALE};
use framesource::FileSequence;
use renderer::{export_texels, load_texels, ExportRequest};

use crate::cli::VerifyArgs;
use crate::reference::{evaluate, highlight, FrameStack};
use crate::run::export_format;

pub fn run(args: VerifyArgs, config: Option<&Path>) -> Result<()> {
    let distortion_scale = resolve_distortion_scale(args.distortion_scale, config)?;
    let mut source = FileSequence::open(&args.source, None)
        .with_context(|| format!("failed to open frames in {}", args.source.display()))?;
    let stack = FrameStack::collect(&mut source, args.frames).context("failed to read frames")?;
    tracing::info!(
        mode = %args.mode,
        frames = stack.len(),
        width = stack.width(),
        height = stack.height(),
        "computing CPU reference"
    );

    let values = evaluate(&stack, args.mode, distortion_scale);
    log_summary(&values, args.mode.is_scalar());

    if let Some(path) = args.output.as_ref() {
        let format = export_format(OutputFormat::from_path(path).unwrap_or(OutputFormat::Png));
        let texels: Vec<[f32; 4]> = values
            .iter()
            .map(|&value| {
                let [r, g, b] = highlight(value);
                [r, g, b, 1.0]
            })
            .collect();
        export_texels(
            &ExportRequest::new(path, format),
            stack.width(),
            stack.height(),
            &texels,
        )
        .context("failed to write reference image")?;
    }

    if let Some(path) = args.compare.as_ref() {
        let (width, height, texels) = load_texels(path)
            .with_context(|| format!("failed to load comparison image {}", path.display()))?;
        if (width, height) != (stack.width(), stack.height()) {
            bail!(
                "comparison image is {width}x{height} but frames are {}x{}",
                stack.width(),
                stack.height()
            );
        }
        let clamp = OutputFormat::from_path(path) != Some(OutputFormat::Exr);
        let error = max_abs_error(&values, &texels, clamp);
        println!("max abs error: {error:.6}");
        tracing::info!(path = %path.display(), error, "compared against export");
        if let Some(tolerance) = args.tolerance {
            if error > tolerance {
                bail!("max abs error {error:.6} exceeds tolerance {tolerance}");
            }
        }
    }
    Ok(())
}

/// Flag first, then the config file's `[verify]` section, then the default.
fn resolve_distortion_scale(flag: Option<f32>, config: Option<&Path>) -> Result<f32> {
    let scale = match (flag, config) {
        (Some(scale), _) => scale,
        (None, Some(path)) => {
            CalibConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?
                .verify
                .distortion_scale
        }
        (None, None) => DEFAULT_DISTORTION_SCALE,
    };
    if !(scale.is_finite() && scale > 0.0) {
        bail!("distortion scale must be a positive number, got {scale}");
    }
    Ok(scale)
}

/// Largest RGB difference; `clamp` limits the reference to the 8-bit range first.
fn max_abs_error(reference: &[[f32; 3]], texels: &[[f32; 4]], clamp: bool) -> f32 {
    reference
        .iter()
        .zip(texels)
        .flat_map(|(expected, actual)| {
            (0..3).map(move |c| {
                let want = if clamp {
                    expected[c].clamp(0.0, 1.0)
                } else {
                    expected[c]
                };
                (want - actual[c]).abs()
            })
        })
        .fold(0.0, f32::max)
}

fn log_summary(values: &[[f32; 3]], scalar: bool) {
    let channels = if scalar { 1 } else { 3 };
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut non_finite = 0usize;
    for value in values {
        for &channel in &value[..channels] {
            if channel.is_finite() {
                min = min.min(channel);
                max = max.max(channel);
            } else {
                non_finite += 1;
            }
        }
    }
    tracing::info!(min, max, non_finite, "reference computed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_ignores_alpha_and_optionally_clamps() {
        let reference = [[0.5, 1.2, 0.0]];
        let texels = [[0.5, 1.0, 0.01, 0.0]];
        assert!((max_abs_error(&reference, &texels, true) - 0.01).abs() < 1e-6);
        assert!((max_abs_error(&reference, &texels, false) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn distortion_scale_prefers_flag_then_config() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("backsub.toml");
        std::fs::write(&path, "version = 1\n\n[verify]\ndistortion_scale = 4.0\n").unwrap();

        assert_eq!(resolve_distortion_scale(Some(2.0), Some(&path)).unwrap(), 2.0);
        assert_eq!(resolve_distortion_scale(None, Some(&path)).unwrap(), 4.0);
        assert_eq!(
            resolve_distortion_scale(None, None).unwrap(),
            DEFAULT_DISTORTION_SCALE
        );
        assert!(resolve_distortion_scale(Some(0.0), None).is_err());
    }
}
