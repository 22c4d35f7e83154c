//! The calibration shader program and its uniform contract.
//!
//! The program is opaque to callers: they set named uniforms and ask the
//! context to draw a quad with it. Backends read the resolved values through
//! [`ShaderProgram::mode`], [`ShaderProgram::num_frames`] and
//! [`ShaderProgram::texture_unit`].

use std::collections::BTreeMap;

use crate::error::{RenderError, RenderResult};
use crate::types::BINDING_UNIT_COUNT;

pub const FRAME_TX: &str = "FrameTx";
pub const SUM_TX: &str = "SumTx";
pub const SUM_SQ_TX: &str = "SumSqTx";
pub const MODE: &str = "Mode";
pub const NUM_FRAMES: &str = "NumFrames";

/// Sampler uniforms in the order backends bind them.
pub const SAMPLER_UNIFORMS: [&str; 3] = [FRAME_TX, SUM_TX, SUM_SQ_TX];

/// What a single quad draw computes per pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Mode {
    /// Copy `FrameTx` to the destination.
    #[default]
    Display = 0,
    /// `Sum + Frame / N`.
    Sum = 1,
    /// `SumSq + (Frame - Sum)^2 / N`.
    SumSq = 2,
    /// `sqrt(SumSq)` per channel.
    StdDev = 3,
}

impl Mode {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Mode::Display),
            1 => Some(Mode::Sum),
            2 => Some(Mode::SumSq),
            3 => Some(Mode::StdDev),
            _ => None,
        }
    }

    pub fn raw(self) -> i32 {
        self as i32
    }

    /// Sampler uniforms the fragment program actually reads in this mode.
    pub fn sampled_inputs(self) -> &'static [&'static str] {
        match self {
            Mode::Display => &[FRAME_TX],
            Mode::Sum => &[FRAME_TX, SUM_TX],
            Mode::SumSq => &[FRAME_TX, SUM_TX, SUM_SQ_TX],
            Mode::StdDev => &[SUM_TX, SUM_SQ_TX],
        }
    }
}

/// Value held by one declared uniform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    TextureUnit(u32),
    Int(i32),
    Float(f32),
}

impl UniformValue {
    fn kind(&self) -> &'static str {
        match self {
            UniformValue::TextureUnit(_) => "texture unit",
            UniformValue::Int(_) => "integer",
            UniformValue::Float(_) => "float",
        }
    }
}

/// A compiled program with a fixed set of typed uniforms.
#[derive(Clone, Debug)]
pub struct ShaderProgram {
    name: String,
    uniforms: BTreeMap<String, UniformValue>,
}

impl ShaderProgram {
    /// Program used by every accumulation and display pass.
    pub fn calibrate() -> Self {
        let mut uniforms = BTreeMap::new();
        uniforms.insert(FRAME_TX.to_string(), UniformValue::TextureUnit(0));
        uniforms.insert(SUM_TX.to_string(), UniformValue::TextureUnit(0));
        uniforms.insert(SUM_SQ_TX.to_string(), UniformValue::TextureUnit(0));
        uniforms.insert(MODE.to_string(), UniformValue::Int(Mode::Display.raw()));
        uniforms.insert(NUM_FRAMES.to_string(), UniformValue::Float(1.0));
        Self {
            name: "calibrate".to_string(),
            uniforms,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets a declared uniform; the value kind must match the declaration.
    pub fn set_uniform(&mut self, name: &str, value: UniformValue) -> RenderResult<()> {
        let slot = self
            .uniforms
            .get_mut(name)
            .ok_or_else(|| RenderError::UnknownUniform(name.to_string()))?;
        if std::mem::discriminant(slot) != std::mem::discriminant(&value) {
            return Err(RenderError::UniformType {
                name: name.to_string(),
                expected: slot.kind(),
            });
        }
        if let UniformValue::TextureUnit(unit) = value {
            if unit as usize >= BINDING_UNIT_COUNT {
                return Err(RenderError::BindingUnitOutOfRange {
                    unit,
                    max: BINDING_UNIT_COUNT as u32,
                });
            }
        }
        *slot = value;
        Ok(())
    }

    pub fn set_texture_unit(&mut self, name: &str, unit: u32) -> RenderResult<()> {
        self.set_uniform(name, UniformValue::TextureUnit(unit))
    }

    pub fn set_int(&mut self, name: &str, value: i32) -> RenderResult<()> {
        self.set_uniform(name, UniformValue::Int(value))
    }

    pub fn set_float(&mut self, name: &str, value: f32) -> RenderResult<()> {
        self.set_uniform(name, UniformValue::Float(value))
    }

    pub fn set_mode(&mut self, mode: Mode) -> RenderResult<()> {
        self.set_int(MODE, mode.raw())
    }

    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.get(name).copied()
    }

    pub fn mode(&self) -> Mode {
        match self.uniforms.get(MODE) {
            Some(UniformValue::Int(raw)) => Mode::from_raw(*raw).unwrap_or_default(),
            _ => Mode::Display,
        }
    }

    pub fn num_frames(&self) -> f32 {
        match self.uniforms.get(NUM_FRAMES) {
            Some(UniformValue::Float(value)) => *value,
            _ => 1.0,
        }
    }

    pub fn texture_unit(&self, name: &str) -> Option<u32> {
        match self.uniforms.get(name) {
            Some(UniformValue::TextureUnit(unit)) => Some(*unit),
            _ => None,
        }
    }
}

/// Per-texel arithmetic of the fragment program.
///
/// The GLSL in [`crate::compile`] and the software backend both follow this
/// function; keep them in lockstep.
pub fn shade_texel(
    mode: Mode,
    num_frames: f32,
    frame: [f32; 4],
    sum: [f32; 4],
    sum_sq: [f32; 4],
) -> [f32; 4] {
    let n = if num_frames > 0.0 { num_frames } else { 1.0 };
    match mode {
        Mode::Display => [frame[0], frame[1], frame[2], 1.0],
        Mode::Sum => std::array::from_fn(|c| sum[c] + frame[c] / n),
        Mode::SumSq => std::array::from_fn(|c| {
            let delta = frame[c] - sum[c];
            sum_sq[c] + delta * delta / n
        }),
        Mode::StdDev => [sum_sq[0].sqrt(), sum_sq[1].sqrt(), sum_sq[2].sqrt(), 1.0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_uniform_is_rejected() {
        let mut program = ShaderProgram::calibrate();
        let err = program.set_int("Gain", 2).unwrap_err();
        assert!(matches!(err, RenderError::UnknownUniform(name) if name == "Gain"));
    }

    #[test]
    fn wrong_uniform_type_is_rejected() {
        let mut program = ShaderProgram::calibrate();
        let err = program.set_float(MODE, 1.0).unwrap_err();
        assert!(matches!(
            err,
            RenderError::UniformType { expected: "integer", .. }
        ));
        assert_eq!(program.mode(), Mode::Display);
    }

    #[test]
    fn texture_unit_must_exist() {
        let mut program = ShaderProgram::calibrate();
        assert!(program.set_texture_unit(SUM_TX, 15).is_ok());
        assert!(matches!(
            program.set_texture_unit(SUM_TX, 16),
            Err(RenderError::BindingUnitOutOfRange { unit: 16, .. })
        ));
    }

    #[test]
    fn shading_follows_the_accumulation_formulas() {
        let frame = [0.5, 1.0, 0.0, 1.0];
        let sum = [0.25, 0.25, 0.25, 0.25];
        let sum_sq = [0.04, 0.09, 0.0, 0.0];

        let out = shade_texel(Mode::Sum, 2.0, frame, sum, sum_sq);
        assert_eq!(out, [0.5, 0.75, 0.25, 0.75]);

        let out = shade_texel(Mode::SumSq, 2.0, frame, sum, sum_sq);
        assert!((out[0] - (0.04 + 0.03125)).abs() < 1e-6);
        assert!((out[1] - (0.09 + 0.28125)).abs() < 1e-6);

        let out = shade_texel(Mode::StdDev, 2.0, frame, sum, sum_sq);
        assert!((out[0] - 0.2).abs() < 1e-6);
        assert!((out[1] - 0.3).abs() < 1e-6);
        assert_eq!(out[3], 1.0);
    }
}
