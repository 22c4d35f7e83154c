use std::collections::VecDeque;
use std::fmt;

/// One unit of work executed per host tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStep {
    /// Upload frame `index` into the input texture.
    LoadFrame { index: u32, frames: u32 },
    /// `Sum += Frame / N`.
    AccumulateSum { index: u32, frames: u32 },
    /// Re-request frame `index`, then `SumSq += (Frame - Sum)^2 / N`.
    AccumulateSumSquares { index: u32, frames: u32 },
    /// `StdDev = sqrt(SumSq)`.
    FinalizeStdDev { frames: u32 },
    /// Show StdDev on the visible surface. Never queued; produced once the
    /// queue has drained.
    Present,
}

impl RenderStep {
    /// True for steps that draw into an accumulation target.
    pub fn is_render_pass(self) -> bool {
        matches!(
            self,
            RenderStep::AccumulateSum { .. }
                | RenderStep::AccumulateSumSquares { .. }
                | RenderStep::FinalizeStdDev { .. }
        )
    }

    pub fn state(self) -> SchedulerState {
        match self {
            RenderStep::LoadFrame { index, .. } => SchedulerState::Loading(index),
            RenderStep::AccumulateSum { index, .. } => SchedulerState::AccumulatingSum(index),
            RenderStep::AccumulateSumSquares { index, .. } => {
                SchedulerState::AccumulatingSumSquares(index)
            }
            RenderStep::FinalizeStdDev { .. } => SchedulerState::Finalizing,
            RenderStep::Present => SchedulerState::SteadyDisplay,
        }
    }
}

impl fmt::Display for RenderStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderStep::LoadFrame { index, frames } => write!(f, "load {}/{frames}", index + 1),
            RenderStep::AccumulateSum { index, frames } => write!(f, "sum {}/{frames}", index + 1),
            RenderStep::AccumulateSumSquares { index, frames } => {
                write!(f, "sum-squares {}/{frames}", index + 1)
            }
            RenderStep::FinalizeStdDev { .. } => f.write_str("finalize"),
            RenderStep::Present => f.write_str("present"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Loading(u32),
    AccumulatingSum(u32),
    AccumulatingSumSquares(u32),
    Finalizing,
    SteadyDisplay,
}

/// Every step needed to accumulate statistics over `frames` frames, in order.
///
/// `frames` load/sum pairs, then `frames` sum-of-squares steps (each reloads
/// its own frame), then the finalize step: `3 * frames + 1` steps of which
/// `2 * frames + 1` draw.
pub fn build_schedule(frames: u32) -> Vec<RenderStep> {
    let mut steps = Vec::with_capacity(3 * frames as usize + 1);
    for index in 0..frames {
        steps.push(RenderStep::LoadFrame { index, frames });
        steps.push(RenderStep::AccumulateSum { index, frames });
    }
    for index in 0..frames {
        steps.push(RenderStep::AccumulateSumSquares { index, frames });
    }
    steps.push(RenderStep::FinalizeStdDev { frames });
    steps
}

/// FIFO of pending steps. The front step stays queued until it completes.
#[derive(Debug, Clone)]
pub struct AccumulationSchedule {
    frames: u32,
    queue: VecDeque<RenderStep>,
}

impl AccumulationSchedule {
    pub fn new(frames: u32) -> Self {
        Self {
            frames,
            queue: build_schedule(frames).into(),
        }
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Step to run on the next tick; `Present` once the queue is empty.
    pub fn current(&self) -> RenderStep {
        self.queue.front().copied().unwrap_or(RenderStep::Present)
    }

    pub fn state(&self) -> SchedulerState {
        self.current().state()
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn is_drained(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drops the front step after it ran to completion.
    pub fn complete(&mut self) -> Option<RenderStep> {
        self.queue.pop_front()
    }

    /// Re-enqueues the full schedule.
    pub fn reset(&mut self) {
        self.queue = build_schedule(self.frames).into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_length_and_draw_count() {
        for frames in [1, 2, 5, 16] {
            let steps = build_schedule(frames);
            assert_eq!(steps.len(), 3 * frames as usize + 1);
            let draws = steps.iter().filter(|step| step.is_render_pass()).count();
            assert_eq!(draws, 2 * frames as usize + 1);
        }
    }

    #[test]
    fn sum_phase_precedes_squares_and_finalize_is_last() {
        let steps = build_schedule(3);
        assert_eq!(steps[0], RenderStep::LoadFrame { index: 0, frames: 3 });
        assert_eq!(steps[1], RenderStep::AccumulateSum { index: 0, frames: 3 });
        assert_eq!(steps[5], RenderStep::AccumulateSum { index: 2, frames: 3 });
        assert_eq!(steps[6], RenderStep::AccumulateSumSquares { index: 0, frames: 3 });
        assert_eq!(steps.last(), Some(&RenderStep::FinalizeStdDev { frames: 3 }));
    }

    #[test]
    fn drained_schedule_presents() {
        let mut schedule = AccumulationSchedule::new(1);
        assert_eq!(schedule.state(), SchedulerState::Loading(0));
        let mut states = Vec::new();
        while let Some(step) = schedule.complete() {
            states.push(step.state());
        }
        assert_eq!(
            states,
            vec![
                SchedulerState::Loading(0),
                SchedulerState::AccumulatingSum(0),
                SchedulerState::AccumulatingSumSquares(0),
                SchedulerState::Finalizing,
            ]
        );
        assert_eq!(schedule.current(), RenderStep::Present);
        assert_eq!(schedule.state(), SchedulerState::SteadyDisplay);

        schedule.reset();
        assert_eq!(schedule.remaining(), 4);
    }
}
