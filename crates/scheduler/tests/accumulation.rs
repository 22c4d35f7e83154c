use std::time::{Duration, Instant};

use framesource::{CaptureSource, FrameSource, MemorySource};
use image::{Rgba, RgbaImage};
use renderer::{
    load_texels, ExportFormat, ExportRequest, GraphicsContext, Rect, SoftwareBackend,
};
use scheduler::{
    AccumulationPipeline, PipelineOptions, RenderStep, SchedulerState, TickOutcome, STD_DEV, SUM,
    SUM_SQ,
};

const TOLERANCE: f32 = 1e-3;

fn software(width: u32, height: u32) -> GraphicsContext {
    GraphicsContext::new(Box::new(SoftwareBackend::new(width, height)))
}

fn build<S: FrameSource>(source: S, options: PipelineOptions) -> AccumulationPipeline<S> {
    let (width, height) = options.target_size.unwrap_or(source.frame_size());
    AccumulationPipeline::new(software(width, height), source, options).unwrap()
}

/// Ticks until steady display is entered, returning every outcome before it.
fn run_to_display<S: FrameSource>(pipeline: &mut AccumulationPipeline<S>) -> Vec<TickOutcome> {
    let mut outcomes = Vec::new();
    for _ in 0..10_000 {
        match pipeline.tick().unwrap() {
            TickOutcome::Displayed { first: true } => return outcomes,
            outcome => outcomes.push(outcome),
        }
    }
    panic!("pipeline never reached steady display");
}

fn varied_frames(count: u32, width: u32, height: u32) -> Vec<RgbaImage> {
    (0..count)
        .map(|frame| {
            RgbaImage::from_fn(width, height, |x, y| {
                let seed = frame * 37 + x * 11 + y * 53;
                Rgba([
                    (seed * 7 % 256) as u8,
                    (seed * 13 % 256) as u8,
                    (seed * 29 % 256) as u8,
                    255,
                ])
            })
        })
        .collect()
}

/// Host-side mean and standard deviation of `frames` replayed in order.
fn reference(frames: &[RgbaImage], count: usize) -> (Vec<[f32; 3]>, Vec<[f32; 3]>) {
    let (width, height) = frames[0].dimensions();
    let pixels = (width * height) as usize;
    let replay: Vec<&RgbaImage> = frames.iter().cycle().take(count).collect();
    let mut mean = vec![[0.0f64; 3]; pixels];
    for frame in &replay {
        for (index, pixel) in frame.pixels().enumerate() {
            for c in 0..3 {
                mean[index][c] += pixel[c] as f64 / 255.0 / count as f64;
            }
        }
    }
    let mut var = vec![[0.0f64; 3]; pixels];
    for frame in &replay {
        for (index, pixel) in frame.pixels().enumerate() {
            for c in 0..3 {
                let delta = pixel[c] as f64 / 255.0 - mean[index][c];
                var[index][c] += delta * delta / count as f64;
            }
        }
    }
    let mean = mean.iter().map(|m| m.map(|v| v as f32)).collect();
    let std = var.iter().map(|v| v.map(|v| v.sqrt() as f32)).collect();
    (mean, std)
}

fn assert_rgb_close(actual: &[[f32; 4]], expected: &[[f32; 3]]) {
    assert_eq!(actual.len(), expected.len());
    for (index, (got, want)) in actual.iter().zip(expected).enumerate() {
        for c in 0..3 {
            assert!(
                (got[c] - want[c]).abs() <= TOLERANCE,
                "texel {index} channel {c}: got {}, want {}",
                got[c],
                want[c]
            );
        }
    }
}

#[test]
fn draw_steps_and_queue_length() {
    for frames in [1u32, 3, 6] {
        let source = MemorySource::solid(2, 2, &[[10, 20, 30, 255], [40, 50, 60, 255]]).unwrap();
        let mut pipeline = build(source, PipelineOptions::new(frames));
        let outcomes = run_to_display(&mut pipeline);

        assert_eq!(outcomes.len(), 3 * frames as usize + 1);
        let passes = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, TickOutcome::Advanced(step) if step.is_render_pass()))
            .count();
        assert_eq!(passes, 2 * frames as usize + 1);
        assert_eq!(pipeline.stats().render_passes, 2 * frames as u64 + 1);
        assert_eq!(pipeline.stats().uploads, 2 * frames as u64);
        // Accumulation passes plus the first display draw.
        assert_eq!(pipeline.context().draw_count(), 2 * frames as u64 + 2);
    }
}

#[test]
fn slot_table_never_aliases() {
    let frames = varied_frames(3, 3, 2);
    let mut pipeline = build(MemorySource::new(frames).unwrap(), PipelineOptions::new(3));
    assert!(pipeline.manager().is_alias_free());
    while pipeline.state() != SchedulerState::SteadyDisplay {
        pipeline.tick().unwrap();
        assert!(pipeline.manager().is_alias_free());
    }
}

#[test]
fn matches_host_reference() {
    let frames = varied_frames(5, 4, 3);
    let (mean, std) = reference(&frames, 5);
    let mut pipeline = build(MemorySource::new(frames).unwrap(), PipelineOptions::new(5));
    run_to_display(&mut pipeline);

    assert_rgb_close(&pipeline.read_target(SUM).unwrap(), &mean);
    assert_rgb_close(&pipeline.read_target(STD_DEV).unwrap(), &std);
}

#[test]
fn slow_ticks_over_capture_source_match_host_reference() {
    let frames = varied_frames(4, 3, 2);
    let (mean, std) = reference(&frames, 4);
    let capture =
        CaptureSource::spawn(MemorySource::new(frames).unwrap(), Duration::from_millis(1)).unwrap();
    let mut pipeline = build(capture, PipelineOptions::new(4));

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        std::thread::sleep(Duration::from_millis(4));
        if let TickOutcome::Displayed { .. } = pipeline.tick().unwrap() {
            break;
        }
        assert!(Instant::now() < deadline, "pipeline never reached steady display");
    }

    assert_eq!(pipeline.stats().uploads, 8);
    assert_rgb_close(&pipeline.read_target(SUM).unwrap(), &mean);
    assert_rgb_close(&pipeline.read_target(STD_DEV).unwrap(), &std);
}

#[test]
fn looping_source_replays_frames_in_order() {
    let frames = varied_frames(2, 2, 2);
    let (mean, std) = reference(&frames, 4);
    let mut pipeline = build(MemorySource::new(frames).unwrap(), PipelineOptions::new(4));
    run_to_display(&mut pipeline);

    assert_rgb_close(&pipeline.read_target(SUM).unwrap(), &mean);
    assert_rgb_close(&pipeline.read_target(STD_DEV).unwrap(), &std);
}

#[test]
fn single_frame_has_zero_deviation() {
    let source = MemorySource::new(varied_frames(1, 3, 3)).unwrap();
    let mut pipeline = build(source, PipelineOptions::new(1));
    run_to_display(&mut pipeline);

    for texel in pipeline.read_target(STD_DEV).unwrap() {
        assert_eq!(&texel[..3], &[0.0, 0.0, 0.0]);
    }
    for texel in pipeline.read_target(SUM_SQ).unwrap() {
        assert_eq!(&texel[..3], &[0.0, 0.0, 0.0]);
    }
}

#[test]
fn primaries_and_black_have_closed_form_statistics() {
    let colors = [
        [255, 0, 0, 255],
        [0, 255, 0, 255],
        [0, 0, 255, 255],
        [0, 0, 0, 255],
    ];
    let source = MemorySource::solid(2, 2, &colors).unwrap();
    let mut pipeline = build(source, PipelineOptions::new(4));
    run_to_display(&mut pipeline);

    let expected_std = (3.0f32 / 16.0).sqrt();
    for texel in pipeline.read_target(SUM).unwrap() {
        for value in &texel[..3] {
            assert!((value - 0.25).abs() <= TOLERANCE);
        }
    }
    for texel in pipeline.read_target(STD_DEV).unwrap() {
        for value in &texel[..3] {
            assert!((value - expected_std).abs() <= TOLERANCE, "{value}");
        }
    }
}

#[test]
fn runs_and_restarts_are_deterministic() {
    let frames = varied_frames(4, 3, 3);
    let mut first = build(MemorySource::new(frames.clone()).unwrap(), PipelineOptions::new(4));
    let mut second = build(MemorySource::new(frames).unwrap(), PipelineOptions::new(4));
    run_to_display(&mut first);
    run_to_display(&mut second);
    let baseline = first.read_target(STD_DEV).unwrap();
    assert_eq!(baseline, second.read_target(STD_DEV).unwrap());

    first.restart().unwrap();
    assert_eq!(first.state(), SchedulerState::Loading(0));
    assert!(!first.is_finished());
    run_to_display(&mut first);
    assert_eq!(baseline, first.read_target(STD_DEV).unwrap());
    assert_eq!(first.stats().restarts, 1);
}

#[test]
fn waiting_source_holds_the_current_step() {
    let source = MemorySource::solid(1, 1, &[[100, 100, 100, 255]])
        .unwrap()
        .with_latency(2);
    let mut pipeline = build(source, PipelineOptions::new(2));

    assert_eq!(
        pipeline.tick().unwrap(),
        TickOutcome::Waiting(RenderStep::LoadFrame { index: 0, frames: 2 })
    );
    assert_eq!(pipeline.state(), SchedulerState::Loading(0));
    assert_eq!(
        pipeline.tick().unwrap(),
        TickOutcome::Waiting(RenderStep::LoadFrame { index: 0, frames: 2 })
    );
    assert_eq!(
        pipeline.tick().unwrap(),
        TickOutcome::Advanced(RenderStep::LoadFrame { index: 0, frames: 2 })
    );
    assert_eq!(pipeline.state(), SchedulerState::AccumulatingSum(0));

    run_to_display(&mut pipeline);
    assert_eq!(pipeline.stats().waits, 8);
    for texel in pipeline.read_target(STD_DEV).unwrap() {
        assert_eq!(&texel[..3], &[0.0, 0.0, 0.0]);
    }
}

#[test]
fn shutdown_releases_every_target() {
    let source = MemorySource::new(varied_frames(2, 2, 2)).unwrap();
    let mut pipeline = build(source, PipelineOptions::new(2));
    let signal = pipeline.shutdown_signal();
    pipeline.tick().unwrap();
    pipeline.tick().unwrap();
    assert!(pipeline.context().live_textures() > 0);

    signal.request();
    assert_eq!(pipeline.tick().unwrap(), TickOutcome::ShutDown);
    assert!(pipeline.is_torn_down());
    assert_eq!(pipeline.context().live_textures(), 0);
    assert!(pipeline.manager().is_torn_down());
    assert_eq!(pipeline.tick().unwrap(), TickOutcome::ShutDown);
}

#[test]
fn valid_region_bounds_every_write() {
    let frames = varied_frames(3, 2, 2);
    let (_, std) = reference(&frames, 3);
    let options = PipelineOptions {
        target_size: Some((4, 4)),
        ..PipelineOptions::new(3)
    };
    let mut pipeline = build(MemorySource::new(frames).unwrap(), options);
    run_to_display(&mut pipeline);
    assert_eq!(pipeline.valid_rect(), Rect::from_size(2, 2));

    for name in [SUM, SUM_SQ, STD_DEV] {
        let id = pipeline.manager().target(name).unwrap().id().unwrap();
        let texels = pipeline
            .context_mut()
            .read_texture(id, Rect::from_size(4, 4))
            .unwrap();
        for (index, texel) in texels.iter().enumerate() {
            let (x, y) = (index % 4, index / 4);
            if x >= 2 || y >= 2 {
                assert_eq!(*texel, [0.0; 4], "{name} written outside the valid region");
            }
        }
    }
    assert_rgb_close(&pipeline.read_target(STD_DEV).unwrap(), &std);
}

#[test]
fn steady_display_stretches_stddev_over_the_surface() {
    let colors = [[255, 255, 255, 255], [0, 0, 0, 255]];
    let source = MemorySource::solid(1, 1, &colors).unwrap();
    let ctx = software(3, 3);
    let mut pipeline = AccumulationPipeline::new(ctx, source, PipelineOptions::new(2)).unwrap();
    run_to_display(&mut pipeline);

    let surface = pipeline
        .context_mut()
        .read_surface(Rect::from_size(3, 3))
        .unwrap();
    // Std of {1, 0} is 0.5, quantized to 128/255 on the 8-bit surface.
    for texel in surface {
        assert!((texel[0] - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(texel[3], 1.0);
    }
}

#[test]
fn first_display_exports_the_stddev_still() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("stddev.exr");
    let frames = varied_frames(3, 3, 2);
    let (_, std) = reference(&frames, 3);
    let options = PipelineOptions {
        export: Some(ExportRequest::new(&path, ExportFormat::Exr)),
        ..PipelineOptions::new(3)
    };
    let mut pipeline = build(MemorySource::new(frames).unwrap(), options);
    run_to_display(&mut pipeline);

    assert_eq!(pipeline.exported(), Some(path.as_path()));
    let (width, height, texels) = load_texels(&path).unwrap();
    assert_eq!((width, height), (3, 2));
    assert_rgb_close(&texels, &std);
}
