use std::fmt;

use thiserror::Error;

use crate::types::{Rect, TextureId};

/// Diagnostic attached to [`RenderError::IncompleteFramebuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    /// No attachment slot holds a target.
    MissingAttachments,
    /// The attachment at `index` was destroyed after being attached.
    IncompleteAttachment { index: u32 },
    /// Attached targets disagree on width or height.
    IncompleteDimensions,
    /// Attached targets disagree on texel format.
    IncompleteFormats,
    /// The same target appears at `index` and at an earlier slot.
    DuplicateAttachment { index: u32 },
    /// The active draw attachment points at an empty slot.
    MissingDrawBuffer { index: u32 },
    /// More attachments than the backend can expose.
    Unsupported { requested: u32, max: u32 },
}

impl FramebufferStatus {
    /// Stable numeric code, useful in logs and exit diagnostics.
    pub fn code(&self) -> u32 {
        match self {
            FramebufferStatus::Complete => 0,
            FramebufferStatus::MissingAttachments => 1,
            FramebufferStatus::IncompleteAttachment { .. } => 2,
            FramebufferStatus::IncompleteDimensions => 3,
            FramebufferStatus::IncompleteFormats => 4,
            FramebufferStatus::DuplicateAttachment { .. } => 5,
            FramebufferStatus::MissingDrawBuffer { .. } => 6,
            FramebufferStatus::Unsupported { .. } => 7,
        }
    }
}

impl fmt::Display for FramebufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramebufferStatus::Complete => f.write_str("complete"),
            FramebufferStatus::MissingAttachments => f.write_str("no attachments"),
            FramebufferStatus::IncompleteAttachment { index } => {
                write!(f, "attachment {index} is no longer alive")
            }
            FramebufferStatus::IncompleteDimensions => {
                f.write_str("attachments have mismatched dimensions")
            }
            FramebufferStatus::IncompleteFormats => f.write_str("attachments have mismatched formats"),
            FramebufferStatus::DuplicateAttachment { index } => {
                write!(f, "attachment {index} duplicates an earlier attachment")
            }
            FramebufferStatus::MissingDrawBuffer { index } => {
                write!(f, "active draw attachment {index} is empty")
            }
            FramebufferStatus::Unsupported { requested, max } => {
                write!(f, "{requested} attachments requested, backend supports {max}")
            }
        }
    }
}

/// Errors raised by render targets, the target set, and the graphics context.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to allocate render target '{label}': {reason}")]
    Allocation { label: String, reason: String },
    #[error("render target set is incomplete (status {code}): {status}", code = .status.code())]
    IncompleteFramebuffer { status: FramebufferStatus },
    #[error("unknown render target name '{0}'")]
    UnknownTarget(String),
    #[error("render target name '{0}' is reserved or already in use")]
    ReservedTarget(String),
    #[error("render target '{label}' used after it was destroyed")]
    UseAfterFree { label: String },
    #[error("texture {0} is not alive in this context")]
    UnknownTexture(TextureId),
    #[error("shader program has no uniform named '{0}'")]
    UnknownUniform(String),
    #[error("uniform '{name}' expects a {expected} value")]
    UniformType { name: String, expected: &'static str },
    #[error("uniform '{uniform}' samples unit {unit}, which has no texture bound")]
    UnboundInput { uniform: &'static str, unit: u32 },
    #[error("uniform '{uniform}' samples unit {unit}, which is also the draw destination")]
    FeedbackLoop { uniform: &'static str, unit: u32 },
    #[error("attachment index {index} out of range (set has {len} slots)")]
    AttachmentOutOfRange { index: u32, len: u32 },
    #[error("binding unit {unit} out of range (context has {max} units)")]
    BindingUnitOutOfRange { unit: u32, max: u32 },
    #[error("image of {width}x{height} does not fit texture of {target_width}x{target_height}")]
    UploadTooLarge {
        width: u32,
        height: u32,
        target_width: u32,
        target_height: u32,
    },
    #[error("quad region {rect} is empty or outside the {width}x{height} destination")]
    RegionOutOfBounds { rect: Rect, width: u32, height: u32 },
    #[error("surface error: {0}")]
    Surface(String),
    #[error("failed to read back texture: {0}")]
    Readback(String),
    #[error("failed to export still image: {0}")]
    Export(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_framebuffer_message_carries_code() {
        let err = RenderError::IncompleteFramebuffer {
            status: FramebufferStatus::IncompleteDimensions,
        };
        let message = err.to_string();
        assert!(message.contains("status 3"), "{message}");
        assert!(message.contains("mismatched dimensions"), "{message}");
    }
}
