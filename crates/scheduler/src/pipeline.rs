use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use framesource::FrameSource;
use renderer::{
    export_texels, DrawDestination, ExportRequest, GraphicsContext, Mode, QuadRegion, Rect,
    ShaderProgram, TargetManager, FRAME_TX, FRAME_UNIT, NUM_FRAMES, SUM_SQ_TX, SUM_TX,
};

use crate::input::FrameInput;
use crate::step::{AccumulationSchedule, RenderStep, SchedulerState};
use crate::{SchedulerError, STD_DEV, SUM, SUM_SQ, TARGET_NAMES};

/// Colour the visible surface is cleared to before StdDev is drawn.
const SURFACE_CLEAR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// N, the number of frames averaged.
    pub frames: u32,
    /// Allocated size of every target; defaults to the frame size.
    pub target_size: Option<(u32, u32)>,
    /// Still written when steady display is first reached.
    pub export: Option<ExportRequest>,
}

impl PipelineOptions {
    pub fn new(frames: u32) -> Self {
        Self {
            frames,
            target_size: None,
            export: None,
        }
    }
}

/// What a single [`AccumulationPipeline::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The step ran and left the queue.
    Advanced(RenderStep),
    /// The frame source had nothing yet; the step stays queued.
    Waiting(RenderStep),
    /// StdDev was drawn to the visible surface. `first` is set on the tick
    /// that entered steady display.
    Displayed { first: bool },
    /// Shutdown was requested; every target has been released.
    ShutDown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub ticks: u64,
    pub uploads: u64,
    pub render_passes: u64,
    pub waits: u64,
    pub presents: u64,
    pub restarts: u64,
}

/// Cloneable flag asking a running pipeline to tear down.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Multi-pass mean / standard deviation accumulation over `N` frames.
///
/// Owns the graphics context, the named targets, the frame input and the
/// step queue. Each [`tick`](Self::tick) runs at most one step.
pub struct AccumulationPipeline<S: FrameSource> {
    ctx: GraphicsContext,
    manager: TargetManager,
    input: FrameInput<S>,
    program: ShaderProgram,
    schedule: AccumulationSchedule,
    export: Option<ExportRequest>,
    exported: Option<PathBuf>,
    finished: bool,
    torn_down: bool,
    stats: PipelineStats,
    shutdown: ShutdownSignal,
}

impl<S: FrameSource> AccumulationPipeline<S> {
    pub fn new(
        mut ctx: GraphicsContext,
        source: S,
        options: PipelineOptions,
    ) -> Result<Self, SchedulerError> {
        if options.frames == 0 {
            return Err(SchedulerError::NoFrames);
        }
        let (frame_width, frame_height) = source.frame_size();
        let (width, height) = options.target_size.unwrap_or((frame_width, frame_height));

        let input = FrameInput::new(&mut ctx, source, width, height)?;
        let valid = Rect::from_size(frame_width, frame_height);
        let manager = TargetManager::new(&mut ctx, &TARGET_NAMES, width, height, valid)?;

        let mut program = ShaderProgram::calibrate();
        program.set_float(NUM_FRAMES, options.frames as f32)?;

        tracing::info!(
            frames = options.frames,
            source = %input.source().describe(),
            backend = %ctx.backend_kind(),
            width,
            height,
            valid = %valid,
            "accumulation pipeline ready"
        );

        Ok(Self {
            ctx,
            manager,
            input,
            program,
            schedule: AccumulationSchedule::new(options.frames),
            export: options.export,
            exported: None,
            finished: false,
            torn_down: false,
            stats: PipelineStats::default(),
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Shares `signal` instead of the pipeline's own flag.
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = signal;
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn context(&self) -> &GraphicsContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut GraphicsContext {
        &mut self.ctx
    }

    pub fn manager(&self) -> &TargetManager {
        &self.manager
    }

    pub fn input(&self) -> &FrameInput<S> {
        &self.input
    }

    pub fn schedule(&self) -> &AccumulationSchedule {
        &self.schedule
    }

    pub fn state(&self) -> SchedulerState {
        self.schedule.state()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn frames(&self) -> u32 {
        self.schedule.frames()
    }

    pub fn valid_rect(&self) -> Rect {
        self.manager.valid_rect()
    }

    /// True once every accumulation step has run.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Path of the still written on entering steady display, if any.
    pub fn exported(&self) -> Option<&Path> {
        self.exported.as_deref()
    }

    /// Runs the next step.
    pub fn tick(&mut self) -> Result<TickOutcome, SchedulerError> {
        if self.shutdown.is_requested() {
            self.teardown()?;
            return Ok(TickOutcome::ShutDown);
        }
        if self.torn_down {
            return Ok(TickOutcome::ShutDown);
        }
        self.stats.ticks += 1;

        let step = self.schedule.current();
        if step == RenderStep::Present {
            return self.present();
        }
        if !self.execute(step)? {
            self.stats.waits += 1;
            tracing::trace!(%step, "frame not ready");
            return Ok(TickOutcome::Waiting(step));
        }
        self.schedule.complete();
        if step.is_render_pass() {
            self.stats.render_passes += 1;
        }
        tracing::debug!(%step, remaining = self.schedule.remaining(), "step complete");
        Ok(TickOutcome::Advanced(step))
    }

    /// Clears every target, rewinds the source and queues the whole run again.
    pub fn restart(&mut self) -> Result<(), SchedulerError> {
        if self.torn_down {
            return Err(renderer::RenderError::UseAfterFree {
                label: self.manager.set().label().to_string(),
            }
            .into());
        }
        self.manager.clear_all(&mut self.ctx)?;
        self.input.rewind()?;
        self.schedule.reset();
        self.finished = false;
        self.stats.restarts += 1;
        tracing::info!(restarts = self.stats.restarts, "accumulation restarted");
        Ok(())
    }

    /// Reads the valid region of one named target back to the host.
    pub fn read_target(&mut self, name: &str) -> Result<Vec<[f32; 4]>, SchedulerError> {
        Ok(self.manager.read(&mut self.ctx, name)?)
    }

    /// Releases every target. Later ticks report [`TickOutcome::ShutDown`].
    pub fn teardown(&mut self) -> Result<(), SchedulerError> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        self.manager.teardown(&mut self.ctx)?;
        self.input.destroy(&mut self.ctx)?;
        tracing::info!(
            ticks = self.stats.ticks,
            live_textures = self.ctx.live_textures(),
            "accumulation pipeline torn down"
        );
        Ok(())
    }

    /// Returns `false` when the step must wait for a frame.
    fn execute(&mut self, step: RenderStep) -> Result<bool, SchedulerError> {
        match step {
            RenderStep::LoadFrame { .. } => {
                if !self.input.try_advance(&mut self.ctx)? {
                    return Ok(false);
                }
                self.stats.uploads += 1;
            }
            RenderStep::AccumulateSum { index, frames } => {
                self.program.set_mode(Mode::Sum)?;
                self.program.set_texture_unit(FRAME_TX, FRAME_UNIT)?;
                self.program.set_texture_unit(SUM_TX, self.manager.unit(SUM)?)?;
                self.pass(SUM)?;
                if index + 1 == frames {
                    self.input.rewind()?;
                }
            }
            RenderStep::AccumulateSumSquares { .. } => {
                if !self.input.try_advance(&mut self.ctx)? {
                    return Ok(false);
                }
                self.stats.uploads += 1;
                self.program.set_mode(Mode::SumSq)?;
                self.program.set_texture_unit(FRAME_TX, FRAME_UNIT)?;
                self.program.set_texture_unit(SUM_TX, self.manager.unit(SUM)?)?;
                self.program.set_texture_unit(SUM_SQ_TX, self.manager.unit(SUM_SQ)?)?;
                self.pass(SUM_SQ)?;
            }
            RenderStep::FinalizeStdDev { .. } => {
                self.program.set_mode(Mode::StdDev)?;
                self.program.set_texture_unit(SUM_TX, self.manager.unit(SUM)?)?;
                self.program.set_texture_unit(SUM_SQ_TX, self.manager.unit(SUM_SQ)?)?;
                self.pass(STD_DEV)?;
            }
            // Handled by `present`; never queued.
            RenderStep::Present => {}
        }
        Ok(true)
    }

    fn pass(&mut self, name: &str) -> Result<(), SchedulerError> {
        self.manager.render(&mut self.ctx, &self.program)?;
        self.manager.end_render(&mut self.ctx, name)?;
        Ok(())
    }

    fn present(&mut self) -> Result<TickOutcome, SchedulerError> {
        let first = !self.finished;
        if first {
            self.finished = true;
            tracing::info!(
                ticks = self.stats.ticks,
                uploads = self.stats.uploads,
                render_passes = self.stats.render_passes,
                waits = self.stats.waits,
                "accumulation complete"
            );
            if let Some(request) = self.export.clone() {
                let texels = self.read_target(STD_DEV)?;
                let valid = self.manager.valid_rect();
                let path = export_texels(&request, valid.width, valid.height, &texels)?;
                self.exported = Some(path);
            }
        }

        self.ctx.set_destination(DrawDestination::Surface)?;
        self.ctx.clear_surface(SURFACE_CLEAR)?;
        self.program.set_mode(Mode::Display)?;
        self.program.set_texture_unit(FRAME_TX, self.manager.unit(STD_DEV)?)?;
        let (width, height) = self.ctx.surface_size();
        let region = QuadRegion::stretched(Rect::from_size(width, height), self.manager.valid_rect());
        self.ctx.draw_quad(&self.program, region)?;
        self.ctx.present()?;
        self.stats.presents += 1;
        Ok(TickOutcome::Displayed { first })
    }
}

impl<S: FrameSource> Drop for AccumulationPipeline<S> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            tracing::warn!(%err, "failed to release render targets");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framesource::MemorySource;
    use renderer::SoftwareBackend;

    fn pipeline(frames: u32, colors: &[[u8; 4]]) -> AccumulationPipeline<MemorySource> {
        let ctx = GraphicsContext::new(Box::new(SoftwareBackend::new(2, 2)));
        let source = MemorySource::solid(2, 2, colors).unwrap();
        AccumulationPipeline::new(ctx, source, PipelineOptions::new(frames)).unwrap()
    }

    #[test]
    fn zero_frames_is_rejected() {
        let ctx = GraphicsContext::software(1, 1);
        let source = MemorySource::solid(1, 1, &[[0, 0, 0, 255]]).unwrap();
        assert!(matches!(
            AccumulationPipeline::new(ctx, source, PipelineOptions::new(0)),
            Err(SchedulerError::NoFrames)
        ));
    }

    #[test]
    fn first_display_is_flagged_once() {
        let mut pipeline = pipeline(1, &[[255, 255, 255, 255]]);
        for _ in 0..4 {
            assert!(matches!(pipeline.tick().unwrap(), TickOutcome::Advanced(_)));
        }
        assert_eq!(pipeline.tick().unwrap(), TickOutcome::Displayed { first: true });
        assert_eq!(pipeline.tick().unwrap(), TickOutcome::Displayed { first: false });
        assert_eq!(pipeline.stats().presents, 2);
    }

    #[test]
    fn restart_after_teardown_fails() {
        let mut pipeline = pipeline(1, &[[0, 0, 0, 255]]);
        pipeline.teardown().unwrap();
        assert!(pipeline.restart().is_err());
        assert_eq!(pipeline.tick().unwrap(), TickOutcome::ShutDown);
    }
}
