//! Named render targets with ping-pong updates.
//!
//! Each logical name ("Sum", "SumSq", "StdDev") owns a binding unit. The
//! texture behind a name changes on every update: a pass samples the name's
//! current texture, draws into the spare "scratch" texture, and
//! [`TargetManager::end_render`] then trades the two. A pass therefore never
//! reads and writes the same texture.
//!
//! Targets live in a fixed arena; names map to arena indices, so the trade is
//! an index swap.

use crate::context::GraphicsContext;
use crate::error::{RenderError, RenderResult};
use crate::program::ShaderProgram;
use crate::target::RenderTarget;
use crate::target_set::RenderTargetSet;
use crate::types::{QuadRegion, Rect, TextureFormat, FRAME_UNIT};

/// Reserved name of the spare target every update draws into.
pub const SCRATCH: &str = "scratch";

pub struct TargetManager {
    set: RenderTargetSet,
    targets: Vec<RenderTarget>,
    /// Slot names; the last slot is always [`SCRATCH`].
    names: Vec<String>,
    /// Slot index to arena index.
    slots: Vec<usize>,
    width: u32,
    height: u32,
    valid: Rect,
    drawn_since_swap: bool,
    torn_down: bool,
}

impl TargetManager {
    /// Allocates one float target per name plus scratch, all `width` x `height`.
    ///
    /// Every draw is confined to `valid`, the top-left region holding real data.
    pub fn new(
        ctx: &mut GraphicsContext,
        names: &[&str],
        width: u32,
        height: u32,
        valid: Rect,
    ) -> RenderResult<Self> {
        let mut slot_names: Vec<String> = Vec::with_capacity(names.len() + 1);
        for name in names {
            if *name == SCRATCH || slot_names.iter().any(|existing| existing == name) {
                return Err(RenderError::ReservedTarget(name.to_string()));
            }
            slot_names.push(name.to_string());
        }
        slot_names.push(SCRATCH.to_string());

        let slot_count = slot_names.len() as u32;
        if slot_count > FRAME_UNIT {
            return Err(RenderError::BindingUnitOutOfRange {
                unit: slot_count - 1,
                max: FRAME_UNIT,
            });
        }
        if valid.is_empty() || !valid.fits_within(width, height) {
            return Err(RenderError::Allocation {
                label: "valid region".to_string(),
                reason: format!("{valid} does not fit {width}x{height} targets"),
            });
        }

        let mut set = RenderTargetSet::new("accumulation targets", slot_count);
        let mut targets = Vec::with_capacity(slot_names.len());
        for (index, name) in slot_names.iter().enumerate() {
            let mut target =
                RenderTarget::create(ctx, name.as_str(), width, height, TextureFormat::Rgba32Float)?;
            set.attach(index as u32, &mut target)?;
            target.bind_as_input(ctx, index as u32)?;
            ctx.clear_texture(target.id()?, [0.0; 4])?;
            targets.push(target);
        }
        set.set_active_draw_attachment(slot_count - 1)?;
        set.validate(ctx, true)?;

        tracing::debug!(
            names = ?slot_names,
            width,
            height,
            valid = %valid,
            "target manager ready"
        );

        Ok(Self {
            set,
            targets,
            slots: (0..slot_names.len()).collect(),
            names: slot_names,
            width,
            height,
            valid,
            drawn_since_swap: false,
            torn_down: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn valid_rect(&self) -> Rect {
        self.valid
    }

    pub fn set(&self) -> &RenderTargetSet {
        &self.set
    }

    /// Logical names, scratch excluded.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names[..self.scratch_slot()]
            .iter()
            .map(String::as_str)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    fn scratch_slot(&self) -> usize {
        self.names.len() - 1
    }

    /// Slot index of `name`; scratch resolves too.
    pub fn slot(&self, name: &str) -> RenderResult<usize> {
        self.names
            .iter()
            .position(|candidate| candidate == name)
            .ok_or_else(|| RenderError::UnknownTarget(name.to_string()))
    }

    /// Binding unit through which `name` is sampled. Stable for the manager's lifetime.
    pub fn unit(&self, name: &str) -> RenderResult<u32> {
        Ok(self.slot(name)? as u32)
    }

    /// Target currently behind `name`.
    pub fn target(&self, name: &str) -> RenderResult<&RenderTarget> {
        let slot = self.slot(name)?;
        Ok(&self.targets[self.slots[slot]])
    }

    /// Draws one quad over the valid region into the scratch target.
    pub fn render(&mut self, ctx: &mut GraphicsContext, program: &ShaderProgram) -> RenderResult<()> {
        self.ensure_alive()?;
        let scratch = &self.targets[self.slots[self.scratch_slot()]];
        let attachment = scratch.attachment().ok_or_else(|| RenderError::UseAfterFree {
            label: scratch.label().to_string(),
        })?;
        self.set.set_active_draw_attachment(attachment)?;

        let mut scope = self.set.begin_draw(ctx)?;
        scope.draw_quad(program, QuadRegion::same(self.valid))?;
        scope.end()?;
        self.drawn_since_swap = true;
        Ok(())
    }

    /// Publishes the scratch target's contents under `name`.
    ///
    /// Swaps the targets behind `name` and scratch. Units stay with the names
    /// and are rebound to the swapped textures; the draw attachment follows
    /// the new scratch target.
    pub fn end_render(&mut self, ctx: &mut GraphicsContext, name: &str) -> RenderResult<()> {
        self.ensure_alive()?;
        let slot = self.slot(name)?;
        let scratch = self.scratch_slot();
        if slot == scratch {
            return Err(RenderError::ReservedTarget(name.to_string()));
        }
        if !self.drawn_since_swap {
            tracing::warn!(
                target_name = name,
                "end_render without a draw since the last swap; reverting the previous swap"
            );
        }

        self.slots.swap(slot, scratch);
        self.targets[self.slots[slot]].bind_as_input(ctx, slot as u32)?;
        self.targets[self.slots[scratch]].bind_as_input(ctx, scratch as u32)?;
        if let Some(attachment) = self.targets[self.slots[scratch]].attachment() {
            self.set.set_active_draw_attachment(attachment)?;
        }
        self.drawn_since_swap = false;
        debug_assert!(self.is_alias_free(), "slot table aliases a render target");
        tracing::trace!(target_name = name, "swapped with scratch");
        Ok(())
    }

    /// True when every slot refers to a distinct arena target.
    pub fn is_alias_free(&self) -> bool {
        let mut seen = vec![false; self.targets.len()];
        for &index in &self.slots {
            match seen.get_mut(index) {
                Some(flag) if !*flag => *flag = true,
                _ => return false,
            }
        }
        true
    }

    /// Zeroes every target, scratch included.
    pub fn clear_all(&mut self, ctx: &mut GraphicsContext) -> RenderResult<()> {
        self.ensure_alive()?;
        for target in &self.targets {
            ctx.clear_texture(target.id()?, [0.0; 4])?;
        }
        self.drawn_since_swap = false;
        Ok(())
    }

    /// Reads the valid region of `name` back to the host.
    pub fn read(&self, ctx: &mut GraphicsContext, name: &str) -> RenderResult<Vec<[f32; 4]>> {
        let id = self.target(name)?.id()?;
        ctx.read_texture(id, self.valid)
    }

    /// Destroys every target and empties the set. Safe to call more than once.
    pub fn teardown(&mut self, ctx: &mut GraphicsContext) -> RenderResult<()> {
        if self.torn_down {
            return Ok(());
        }
        self.set.detach_all();
        for target in &mut self.targets {
            if !target.is_destroyed() {
                target.destroy(ctx)?;
            }
        }
        self.torn_down = true;
        tracing::debug!("target manager torn down");
        Ok(())
    }

    fn ensure_alive(&self) -> RenderResult<()> {
        if self.torn_down {
            return Err(RenderError::UseAfterFree {
                label: self.set.label().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Mode, FRAME_TX, SUM_TX};
    use crate::types::{TextureDesc, TextureId};

    fn manager(ctx: &mut GraphicsContext) -> TargetManager {
        TargetManager::new(ctx, &["Sum", "SumSq", "StdDev"], 4, 4, Rect::from_size(4, 4)).unwrap()
    }

    fn solid_frame(ctx: &mut GraphicsContext, value: u8) -> TextureId {
        let id = ctx
            .create_texture(TextureDesc::new("frame", 4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        ctx.upload_rgba8(id, &image::RgbaImage::from_pixel(4, 4, image::Rgba([value; 4])))
            .unwrap();
        ctx.bind_texture(FRAME_UNIT, Some(id)).unwrap();
        id
    }

    fn sum_program(manager: &TargetManager) -> ShaderProgram {
        let mut program = ShaderProgram::calibrate();
        program.set_mode(Mode::Sum).unwrap();
        program.set_float("NumFrames", 2.0).unwrap();
        program.set_texture_unit(FRAME_TX, FRAME_UNIT).unwrap();
        program.set_texture_unit(SUM_TX, manager.unit("Sum").unwrap()).unwrap();
        program
    }

    #[test]
    fn units_stay_with_names_across_swaps() {
        let mut ctx = GraphicsContext::software(4, 4);
        let mut manager = manager(&mut ctx);
        let before = manager.target("Sum").unwrap().id().unwrap();
        let unit = manager.unit("Sum").unwrap();

        solid_frame(&mut ctx, 255);
        let program = sum_program(&manager);
        manager.render(&mut ctx, &program).unwrap();
        manager.end_render(&mut ctx, "Sum").unwrap();

        let after = manager.target("Sum").unwrap().id().unwrap();
        assert_ne!(before, after);
        assert_eq!(manager.unit("Sum").unwrap(), unit);
        assert_eq!(ctx.bound_texture(unit), Some(after));
        assert!(manager.is_alias_free());
        assert_eq!(
            manager.set().attached(manager.set().active_draw_attachment()),
            Some(before)
        );
    }

    #[test]
    fn two_updates_accumulate_through_scratch() {
        let mut ctx = GraphicsContext::software(4, 4);
        let mut manager = manager(&mut ctx);
        solid_frame(&mut ctx, 255);
        let program = sum_program(&manager);
        for _ in 0..2 {
            manager.render(&mut ctx, &program).unwrap();
            manager.end_render(&mut ctx, "Sum").unwrap();
        }
        let texels = manager.read(&mut ctx, "Sum").unwrap();
        assert!(texels.iter().all(|t| (t[0] - 1.0).abs() < 1e-6));
    }

    #[test]
    fn double_end_render_is_a_no_op_pair() {
        let mut ctx = GraphicsContext::software(4, 4);
        let mut manager = manager(&mut ctx);
        let before = manager.target("SumSq").unwrap().id().unwrap();
        manager.end_render(&mut ctx, "SumSq").unwrap();
        manager.end_render(&mut ctx, "SumSq").unwrap();
        assert_eq!(manager.target("SumSq").unwrap().id().unwrap(), before);
        assert!(manager.is_alias_free());
    }

    #[test]
    fn unknown_and_reserved_names_are_rejected() {
        let mut ctx = GraphicsContext::software(4, 4);
        let mut manager = manager(&mut ctx);
        assert!(matches!(
            manager.end_render(&mut ctx, "Mean"),
            Err(RenderError::UnknownTarget(name)) if name == "Mean"
        ));
        assert!(matches!(
            manager.end_render(&mut ctx, SCRATCH),
            Err(RenderError::ReservedTarget(_))
        ));
        assert!(matches!(
            TargetManager::new(&mut ctx, &["Sum", "Sum"], 4, 4, Rect::from_size(4, 4)),
            Err(RenderError::ReservedTarget(_))
        ));
    }

    #[test]
    fn sampling_scratch_is_a_feedback_loop() {
        let mut ctx = GraphicsContext::software(4, 4);
        let mut manager = manager(&mut ctx);
        solid_frame(&mut ctx, 255);
        let mut program = sum_program(&manager);
        program
            .set_texture_unit(SUM_TX, manager.unit(SCRATCH).unwrap())
            .unwrap();
        assert!(matches!(
            manager.render(&mut ctx, &program),
            Err(RenderError::FeedbackLoop { .. })
        ));
    }

    #[test]
    fn teardown_releases_everything() {
        let mut ctx = GraphicsContext::software(4, 4);
        let mut manager = manager(&mut ctx);
        assert_eq!(ctx.live_textures(), 4);
        manager.teardown(&mut ctx).unwrap();
        manager.teardown(&mut ctx).unwrap();
        assert_eq!(ctx.live_textures(), 0);
        assert!(matches!(
            manager.end_render(&mut ctx, "Sum"),
            Err(RenderError::UseAfterFree { .. })
        ));
    }
}
