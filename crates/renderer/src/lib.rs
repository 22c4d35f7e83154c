//! Render-to-texture building blocks for per-pixel frame statistics.
//!
//! ```text
//!   GraphicsContext ── binding units, draw destination, Box<dyn Backend>
//!          │                                   ├─ WgpuBackend (wgpu + GLSL)
//!          │                                   └─ SoftwareBackend (CPU)
//!          ▼
//!   TargetManager ── names → RenderTarget arena, one RenderTargetSet
//!          │            render(): quad into "scratch"
//!          │            end_render(name): swap name ⇄ scratch
//!          ▼
//!   ShaderProgram ── FrameTx / SumTx / SumSqTx / Mode / NumFrames
//! ```
//!
//! All context-global GPU state (which texture each binding unit samples and
//! where draws land) lives on [`GraphicsContext`]; every component receives
//! it explicitly.

mod compile;
mod context;
mod error;
mod export;
mod gpu;
mod manager;
mod program;
mod software;
mod target;
mod target_set;
mod types;

pub use context::{Backend, DrawCall, GraphicsContext};
pub use error::{FramebufferStatus, RenderError, RenderResult};
pub use export::{export_texels, load_texels, ExportRequest};
pub use gpu::{WgpuBackend, WgpuOptions};
pub use manager::{TargetManager, SCRATCH};
pub use program::{
    shade_texel, Mode, ShaderProgram, UniformValue, FRAME_TX, MODE, NUM_FRAMES, SUM_SQ_TX, SUM_TX,
};
pub use software::SoftwareBackend;
pub use target::RenderTarget;
pub use target_set::{DrawScope, RenderTargetSet};
pub use types::{
    AdapterProfile, BackendKind, DrawDestination, ExportFormat, GpuPowerPreference, QuadRegion,
    Rect, TextureDesc, TextureFormat, TextureId, BINDING_UNIT_COUNT, FRAME_UNIT,
};
