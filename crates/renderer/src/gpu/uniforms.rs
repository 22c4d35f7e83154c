use bytemuck::{Pod, Zeroable};

use crate::context::DrawCall;
use crate::types::Rect;

#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct CalibrateUniforms {
    pub u_mode: i32,
    pub u_num_frames: f32,
    pub u_padding0: [f32; 2],
    pub u_target_rect: [f32; 4],
    pub u_source_rect: [f32; 4],
}

unsafe impl Zeroable for CalibrateUniforms {}
unsafe impl Pod for CalibrateUniforms {}

impl CalibrateUniforms {
    pub fn from_call(call: &DrawCall) -> Self {
        Self {
            u_mode: call.mode.raw(),
            u_num_frames: call.num_frames,
            u_padding0: [0.0; 2],
            u_target_rect: rect_to_vec4(call.region.target),
            u_source_rect: rect_to_vec4(call.region.source),
        }
    }
}

fn rect_to_vec4(rect: Rect) -> [f32; 4] {
    [
        rect.x as f32,
        rect.y as f32,
        rect.width as f32,
        rect.height as f32,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Mode;
    use crate::types::{DrawDestination, QuadRegion};

    #[test]
    fn layout_matches_std140_block() {
        assert_eq!(std::mem::size_of::<CalibrateUniforms>(), 48);
        assert_eq!(std::mem::offset_of!(CalibrateUniforms, u_target_rect), 16);
        assert_eq!(std::mem::offset_of!(CalibrateUniforms, u_source_rect), 32);
    }

    #[test]
    fn draw_call_fields_are_forwarded() {
        let call = DrawCall {
            mode: Mode::SumSq,
            num_frames: 4.0,
            inputs: [None; 3],
            destination: DrawDestination::Surface,
            region: QuadRegion::stretched(Rect::new(0, 0, 8, 6), Rect::new(1, 2, 3, 4)),
        };
        let uniforms = CalibrateUniforms::from_call(&call);
        assert_eq!(uniforms.u_mode, 2);
        assert_eq!(uniforms.u_num_frames, 4.0);
        assert_eq!(uniforms.u_source_rect, [1.0, 2.0, 3.0, 4.0]);
        let bytes = bytemuck::bytes_of(&uniforms);
        assert_eq!(bytes.len(), 48);
    }
}
