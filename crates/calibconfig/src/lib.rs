use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FRAMES: u32 = 16;
/// Preview window size when neither the config nor the CLI names one.
pub const DEFAULT_WINDOW_SIZE: Size = Size {
    width: 512,
    height: 512,
};
pub const DEFAULT_DISTORTION_SCALE: f32 = 10.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read configuration {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Width and height in pixels, written `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Size {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        let (width, height) = normalized
            .split_once('x')
            .ok_or_else(|| format!("invalid size '{raw}'; expected WIDTHxHEIGHT"))?;
        let width: u32 = width
            .trim()
            .parse()
            .map_err(|_| format!("invalid width in size '{raw}'"))?;
        let height: u32 = height
            .trim()
            .parse()
            .map_err(|_| format!("invalid height in size '{raw}'"))?;
        if width == 0 || height == 0 {
            return Err(format!("size '{raw}' must be non-zero in both dimensions"));
        }
        Ok(Self { width, height })
    }
}

impl<'de> Deserialize<'de> for Size {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Helper {
            Str(String),
            Pair([u32; 2]),
        }

        match Helper::deserialize(deserializer)? {
            Helper::Str(raw) => raw.parse().map_err(de::Error::custom),
            Helper::Pair([width, height]) => Ok(Size { width, height }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    #[default]
    Wgpu,
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSetting {
    Low,
    #[default]
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Exr,
}

impl OutputFormat {
    /// Guesses the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(Self::Png),
            "exr" => Some(Self::Exr),
            _ => None,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "exr" | "openexr" => Ok(Self::Exr),
            other => Err(format!("invalid output format '{other}'; expected png or exr")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalibConfig {
    pub version: u32,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub render: RenderSection,
    #[serde(default)]
    pub output: Option<OutputSection>,
    #[serde(default)]
    pub capture: Option<CaptureSection>,
    #[serde(default)]
    pub verify: VerifySection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunSection {
    #[serde(default = "default_frames")]
    pub frames: u32,
    #[serde(default)]
    pub source: Option<PathBuf>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            frames: DEFAULT_FRAMES,
            source: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RenderSection {
    #[serde(default)]
    pub backend: BackendChoice,
    /// Allocated render target size; defaults to the frame size.
    #[serde(default)]
    pub target_size: Option<Size>,
    #[serde(default)]
    pub window: bool,
    #[serde(default)]
    pub window_size: Option<Size>,
    #[serde(default)]
    pub power: PowerSetting,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputSection {
    pub path: PathBuf,
    #[serde(default)]
    pub format: Option<OutputFormat>,
}

impl OutputSection {
    /// Explicit format, else the one implied by the extension, else PNG.
    pub fn resolved_format(&self) -> OutputFormat {
        self.format
            .or_else(|| OutputFormat::from_path(&self.path))
            .unwrap_or(OutputFormat::Png)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureSection {
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub interval: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifySection {
    /// Divisor applied to chromaticity and combined distortion images.
    #[serde(default = "default_distortion_scale")]
    pub distortion_scale: f32,
}

impl Default for VerifySection {
    fn default() -> Self {
        Self {
            distortion_scale: DEFAULT_DISTORTION_SCALE,
        }
    }
}

fn default_frames() -> u32 {
    DEFAULT_FRAMES
}

fn default_distortion_scale() -> f32 {
    DEFAULT_DISTORTION_SCALE
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl Default for CalibConfig {
    fn default() -> Self {
        Self {
            version: 1,
            run: RunSection::default(),
            render: RenderSection::default(),
            output: None,
            capture: None,
            verify: VerifySection::default(),
        }
    }
}

impl CalibConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: CalibConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn capture_interval(&self) -> Option<Duration> {
        self.capture.as_ref().map(|capture| capture.interval)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.run.frames == 0 {
            return Err(ConfigError::Invalid(
                "run.frames must be at least 1".into(),
            ));
        }

        if let Some(source) = &self.run.source {
            if source.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("run.source may not be empty".into()));
            }
        }

        if let Some(size) = self.render.target_size {
            if size.is_empty() {
                return Err(ConfigError::Invalid(
                    "render.target_size must be non-zero".into(),
                ));
            }
        }

        if let Some(size) = self.render.window_size {
            if size.is_empty() {
                return Err(ConfigError::Invalid(
                    "render.window_size must be non-zero".into(),
                ));
            }
        }

        if let Some(output) = &self.output {
            if output.path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("output.path may not be empty".into()));
            }
            if let (Some(explicit), Some(implied)) =
                (output.format, OutputFormat::from_path(&output.path))
            {
                if explicit != implied {
                    return Err(ConfigError::Invalid(format!(
                        "output.format {explicit:?} contradicts the extension of {}",
                        output.path.display()
                    )));
                }
            }
        }

        if let Some(capture) = &self.capture {
            if capture.interval.is_zero() {
                return Err(ConfigError::Invalid(
                    "capture.interval must be greater than zero".into(),
                ));
            }
        }

        let scale = self.verify.distortion_scale;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "verify.distortion_scale must be a positive number, got {scale}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1

[run]
frames = 32
source = "captures/desk"

[render]
backend = "software"
target_size = "640x480"
window = true
window_size = [1280, 720]
power = "low"

[output]
path = "out/stddev.exr"

[capture]
interval = "33ms"

[verify]
distortion_scale = 12.5
"#;

    #[test]
    fn parses_sample_config() {
        let config = CalibConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.run.frames, 32);
        assert_eq!(config.run.source, Some(PathBuf::from("captures/desk")));
        assert_eq!(config.render.backend, BackendChoice::Software);
        assert_eq!(config.render.target_size, Some(Size::new(640, 480)));
        assert_eq!(config.render.window_size, Some(Size::new(1280, 720)));
        assert_eq!(config.render.power, PowerSetting::Low);
        assert_eq!(
            config.output.as_ref().map(OutputSection::resolved_format),
            Some(OutputFormat::Exr)
        );
        assert_eq!(config.capture_interval(), Some(Duration::from_millis(33)));
        assert_eq!(config.verify.distortion_scale, 12.5);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = CalibConfig::from_toml_str("version = 1").unwrap();
        assert_eq!(config.run.frames, DEFAULT_FRAMES);
        assert_eq!(config.render.backend, BackendChoice::Wgpu);
        assert!(config.output.is_none());
        assert!(config.capture_interval().is_none());
        assert_eq!(config.verify.distortion_scale, DEFAULT_DISTORTION_SCALE);
    }

    #[test]
    fn rejects_zero_frames() {
        let err = CalibConfig::from_toml_str("version = 1\n[run]\nframes = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_version() {
        let err = CalibConfig::from_toml_str("version = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_malformed_size() {
        let err = CalibConfig::from_toml_str(
            r#"
version = 1
[render]
target_size = "640by480"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_contradicting_output_format() {
        let err = CalibConfig::from_toml_str(
            r#"
version = 1
[output]
path = "stddev.png"
format = "exr"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_non_positive_distortion_scale() {
        let err = CalibConfig::from_toml_str("version = 1\n[verify]\ndistortion_scale = 0.0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn size_parsing_accepts_mixed_case_and_spaces() {
        assert_eq!("800X600".parse::<Size>(), Ok(Size::new(800, 600)));
        assert_eq!(" 64 x 32 ".parse::<Size>(), Ok(Size::new(64, 32)));
        assert!("0x10".parse::<Size>().is_err());
        assert!("wide".parse::<Size>().is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CalibConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
