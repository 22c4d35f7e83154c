//! CPU reference statistics.
//!
//! Recomputes per-pixel mean and standard deviation straight from the frames,
//! plus the brightness (`xi`, `ai`) and chromaticity (`cdi`, `bi`) distortion
//! measures used for background subtraction. Used to check GPU exports.

use std::fmt;
use std::str::FromStr;

use framesource::{FrameError, FrameSource};

/// Lower bound applied to every standard deviation channel.
pub const STDDEV_FLOOR: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    Mean,
    StdDev,
    /// Brightness distortion of the first frame.
    Xi,
    /// Chromaticity distortion of the first frame.
    Cdi,
    /// RMS chromaticity distortion over all frames.
    Bi,
    /// RMS brightness distortion (about 1) over all frames.
    Ai,
}

impl VerifyMode {
    /// True for modes producing one grey value per pixel.
    pub fn is_scalar(self) -> bool {
        !matches!(self, VerifyMode::Mean | VerifyMode::StdDev)
    }
}

impl FromStr for VerifyMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "stddev" | "std" => Ok(Self::StdDev),
            "xi" => Ok(Self::Xi),
            "cdi" => Ok(Self::Cdi),
            "bi" => Ok(Self::Bi),
            "ai" => Ok(Self::Ai),
            other => Err(format!(
                "unknown verify mode '{other}'; expected mean, stddev, xi, cdi, bi or ai"
            )),
        }
    }
}

impl fmt::Display for VerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VerifyMode::Mean => "mean",
            VerifyMode::StdDev => "stddev",
            VerifyMode::Xi => "xi",
            VerifyMode::Cdi => "cdi",
            VerifyMode::Bi => "bi",
            VerifyMode::Ai => "ai",
        };
        f.write_str(name)
    }
}

/// Frames as normalized RGB, one `Vec` per frame in row-major order.
#[derive(Debug, Clone)]
pub struct FrameStack {
    width: u32,
    height: u32,
    frames: Vec<Vec<[f32; 3]>>,
}

impl FrameStack {
    /// Pulls `count` frames from `source`, looping it as needed.
    pub fn collect<S: FrameSource + ?Sized>(source: &mut S, count: u32) -> Result<Self, FrameError> {
        if count == 0 {
            return Err(FrameError::NoFrames);
        }
        let (width, height) = source.frame_size();
        let mut frames: Vec<Vec<[f32; 3]>> = Vec::with_capacity(count as usize);
        while frames.len() < count as usize {
            match source.try_next()? {
                Some(frame) => frames.push(
                    frame
                        .pixels()
                        .map(|pixel| std::array::from_fn(|c| pixel[c] as f32 / 255.0))
                        .collect(),
                ),
                None => std::thread::yield_now(),
            }
        }
        Ok(Self {
            width,
            height,
            frames,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn samples(&self, pixel: usize) -> Vec<[f32; 3]> {
        self.frames.iter().map(|frame| frame[pixel]).collect()
    }
}

/// Evaluates `mode` for every pixel. Chromaticity measures are divided by
/// `distortion_scale`.
pub fn evaluate(stack: &FrameStack, mode: VerifyMode, distortion_scale: f32) -> Vec<[f32; 3]> {
    let pixels = stack.width as usize * stack.height as usize;
    (0..pixels)
        .map(|pixel| process_pixel(&stack.samples(pixel), mode, distortion_scale))
        .collect()
}

fn process_pixel(values: &[[f32; 3]], mode: VerifyMode, scale: f32) -> [f32; 3] {
    let n = values.len() as f32;
    let mean = mean(values);
    let sigma = stddev(values, mean);
    let grey = match mode {
        VerifyMode::Mean => return mean,
        VerifyMode::StdDev => return sigma,
        VerifyMode::Xi => brightness(values[0], mean, sigma),
        VerifyMode::Cdi => {
            let xi = brightness(values[0], mean, sigma);
            chromaticity(values[0], mean, sigma, xi) / scale
        }
        VerifyMode::Bi => {
            let total: f32 = values
                .iter()
                .map(|&value| chromaticity(value, mean, sigma, brightness(value, mean, sigma)).powi(2))
                .sum();
            (total / n).sqrt() / scale
        }
        VerifyMode::Ai => {
            let total: f32 = values
                .iter()
                .map(|&value| (brightness(value, mean, sigma) - 1.0).powi(2))
                .sum();
            (total / n).sqrt()
        }
    };
    [grey; 3]
}

fn mean(values: &[[f32; 3]]) -> [f32; 3] {
    let n = values.len() as f32;
    std::array::from_fn(|c| values.iter().map(|value| value[c]).sum::<f32>() / n)
}

fn stddev(values: &[[f32; 3]], mean: [f32; 3]) -> [f32; 3] {
    let n = values.len() as f32;
    std::array::from_fn(|c| {
        let variance = values
            .iter()
            .map(|value| (value[c] - mean[c]).powi(2))
            .sum::<f32>()
            / n;
        variance.sqrt().max(STDDEV_FLOOR)
    })
}

/// Brightness distortion: the scale of `mean` closest to `value` in the
/// sigma-weighted RGB metric.
fn brightness(value: [f32; 3], mean: [f32; 3], sigma: [f32; 3]) -> f32 {
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for c in 0..3 {
        let weight = sigma[c] * sigma[c];
        numerator += value[c] * mean[c] / weight;
        denominator += mean[c] * mean[c] / weight;
    }
    numerator / denominator
}

/// Chromaticity distortion: sigma-weighted distance from `value` to `xi * mean`.
fn chromaticity(value: [f32; 3], mean: [f32; 3], sigma: [f32; 3], xi: f32) -> f32 {
    (0..3)
        .map(|c| ((value[c] - xi * mean[c]) / sigma[c]).powi(2))
        .sum::<f32>()
        .sqrt()
}

/// Maps a result to a displayable colour, flagging values that cannot be shown.
///
/// NaN becomes yellow, any negative channel blue, any channel above one red.
pub fn highlight(value: [f32; 3]) -> [f32; 3] {
    if value.iter().any(|channel| channel.is_nan()) {
        return [1.0, 1.0, 0.0];
    }
    if value.iter().any(|&channel| channel < 0.0) {
        return [0.0, 0.0, 1.0];
    }
    if value.iter().any(|&channel| channel > 1.0) {
        return [1.0, 0.0, 0.0];
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use framesource::MemorySource;

    fn stack(colors: &[[u8; 4]]) -> FrameStack {
        let mut source = MemorySource::solid(1, 1, colors).unwrap();
        FrameStack::collect(&mut source, colors.len() as u32).unwrap()
    }

    #[test]
    fn mean_and_stddev_of_primaries() {
        let stack = stack(&[
            [255, 0, 0, 255],
            [0, 255, 0, 255],
            [0, 0, 255, 255],
            [0, 0, 0, 255],
        ]);
        let mean = evaluate(&stack, VerifyMode::Mean, 10.0)[0];
        let std = evaluate(&stack, VerifyMode::StdDev, 10.0)[0];
        for c in 0..3 {
            assert!((mean[c] - 0.25).abs() < 1e-6);
            assert!((std[c] - (3.0f32 / 16.0).sqrt()).abs() < 1e-6);
        }
    }

    #[test]
    fn constant_sequence_is_floored() {
        let stack = stack(&[[51, 102, 153, 255], [51, 102, 153, 255]]);
        assert_eq!(evaluate(&stack, VerifyMode::StdDev, 10.0)[0], [STDDEV_FLOOR; 3]);
        let xi = evaluate(&stack, VerifyMode::Xi, 10.0)[0][0];
        assert!((xi - 1.0).abs() < 1e-4);
        let ai = evaluate(&stack, VerifyMode::Ai, 10.0)[0][0];
        assert!(ai < 1e-3);
    }

    #[test]
    fn brightness_tracks_uniform_scaling() {
        // Frames are the same colour at two intensities; xi of the brighter
        // first frame relative to the mean is 4/3.
        let stack = stack(&[[200, 100, 40, 255], [100, 50, 20, 255]]);
        let xi = evaluate(&stack, VerifyMode::Xi, 10.0)[0][0];
        assert!((xi - 4.0 / 3.0).abs() < 1e-3, "{xi}");
        let cdi = evaluate(&stack, VerifyMode::Cdi, 10.0)[0][0];
        assert!(cdi.abs() < 1e-3, "{cdi}");
    }

    #[test]
    fn distortion_scale_divides_chromaticity() {
        let stack = stack(&[[200, 10, 40, 255], [30, 150, 20, 255], [90, 90, 90, 255]]);
        let coarse = evaluate(&stack, VerifyMode::Bi, 1.0)[0][0];
        let fine = evaluate(&stack, VerifyMode::Bi, 10.0)[0][0];
        assert!((coarse / 10.0 - fine).abs() < 1e-5);
    }

    #[test]
    fn black_background_is_flagged() {
        let stack = stack(&[[0, 0, 0, 255], [0, 0, 0, 255]]);
        let xi = evaluate(&stack, VerifyMode::Xi, 10.0)[0];
        assert_eq!(highlight(xi), [1.0, 1.0, 0.0]);
    }

    #[test]
    fn highlight_flags_out_of_range() {
        assert_eq!(highlight([0.2, -0.1, 0.3]), [0.0, 0.0, 1.0]);
        assert_eq!(highlight([0.2, 1.5, 0.3]), [1.0, 0.0, 0.0]);
        assert_eq!(highlight([0.2, 0.5, 0.3]), [0.2, 0.5, 0.3]);
    }

    #[test]
    fn mode_names_parse_case_insensitively() {
        assert_eq!("CDi".parse::<VerifyMode>(), Ok(VerifyMode::Cdi));
        assert_eq!("StdDev".parse::<VerifyMode>(), Ok(VerifyMode::StdDev));
        assert!("median".parse::<VerifyMode>().is_err());
    }
}
