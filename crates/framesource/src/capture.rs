//! Background capture.
//!
//! The worker thread polls the wrapped source at a fixed interval and parks
//! each frame in a one-frame slot. It only fills an empty slot, so frames are
//! handed out in source order and none is skipped. The owner's `try_next`
//! takes the parked frame and never waits on the worker.

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use image::RgbaImage;
use tracing::{debug, warn};

use crate::{FrameError, FrameSource};

enum CaptureCommand {
    /// Wakes the worker so a rewind is handled before the next interval.
    Rewind,
    Stop,
}

#[derive(Default)]
struct LatestFrame {
    frame: Option<RgbaImage>,
    /// Bumped by every rewind. Frames read under an older generation are dropped.
    generation: u64,
    error: Option<FrameError>,
    finished: bool,
}

/// Runs a [`FrameSource`] on a worker thread and hands out its frames one at a time.
pub struct CaptureSource {
    latest: Arc<Mutex<LatestFrame>>,
    commands: Sender<CaptureCommand>,
    worker: Option<JoinHandle<()>>,
    size: (u32, u32),
    description: String,
}

impl CaptureSource {
    pub fn spawn<S>(source: S, interval: Duration) -> Result<Self, FrameError>
    where
        S: FrameSource + 'static,
    {
        let size = source.frame_size();
        let description = format!("capture of {} every {interval:?}", source.describe());
        let latest = Arc::new(Mutex::new(LatestFrame::default()));
        let (commands, command_rx) = unbounded();

        let shared = Arc::clone(&latest);
        let worker = thread::Builder::new()
            .name("frame-capture".to_string())
            .spawn(move || {
                let mut source = source;
                let mut seen = 0u64;
                loop {
                    let (generation, wanted) = match shared.lock() {
                        Ok(slot) => (slot.generation, slot.frame.is_none()),
                        Err(_) => break,
                    };
                    if generation != seen {
                        if let Err(err) = source.rewind() {
                            store_error(&shared, err);
                            break;
                        }
                        seen = generation;
                    }

                    if wanted {
                        match source.try_next() {
                            Ok(Some(frame)) => match shared.lock() {
                                Ok(mut slot) if slot.generation == seen => slot.frame = Some(frame),
                                Ok(_) => debug!("dropping frame read before rewind"),
                                Err(_) => break,
                            },
                            Ok(None) => {}
                            Err(err) => {
                                store_error(&shared, err);
                                break;
                            }
                        }
                    }

                    match command_rx.recv_timeout(interval) {
                        Ok(CaptureCommand::Rewind) | Err(RecvTimeoutError::Timeout) => {}
                        Ok(CaptureCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                if let Ok(mut slot) = shared.lock() {
                    slot.finished = true;
                }
                debug!("capture worker exited");
            })?;

        Ok(Self {
            latest,
            commands,
            worker: Some(worker),
            size,
            description,
        })
    }
}

fn store_error(shared: &Mutex<LatestFrame>, err: FrameError) {
    if let Ok(mut slot) = shared.lock() {
        slot.error = Some(err);
    }
}

impl FrameSource for CaptureSource {
    fn frame_size(&self) -> (u32, u32) {
        self.size
    }

    fn try_next(&mut self) -> Result<Option<RgbaImage>, FrameError> {
        let mut slot = self
            .latest
            .lock()
            .map_err(|_| FrameError::Capture("latest-frame lock poisoned".to_string()))?;
        if let Some(err) = slot.error.take() {
            return Err(err);
        }
        match slot.frame.take() {
            Some(frame) => Ok(Some(frame)),
            None if slot.finished => Err(FrameError::Disconnected),
            None => Ok(None),
        }
    }

    /// Drops any parked frame and asks the worker to rewind its source.
    ///
    /// The next frame handed out is the source's first.
    fn rewind(&mut self) -> Result<(), FrameError> {
        {
            let mut slot = self
                .latest
                .lock()
                .map_err(|_| FrameError::Capture("latest-frame lock poisoned".to_string()))?;
            slot.frame = None;
            slot.generation += 1;
        }
        self.commands
            .send(CaptureCommand::Rewind)
            .map_err(|_| FrameError::Disconnected)
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        let _ = self.commands.send(CaptureCommand::Stop);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("capture worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::MemorySource;

    fn poll_until_frame(source: &mut CaptureSource) -> RgbaImage {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(frame) = source.try_next().unwrap() {
                return frame;
            }
            assert!(Instant::now() < deadline, "capture produced no frame");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn latest_frame_is_handed_out_once() {
        let inner = MemorySource::solid(2, 2, &[[9, 9, 9, 255]]).unwrap();
        let mut capture = CaptureSource::spawn(inner, Duration::from_secs(60)).unwrap();
        let frame = poll_until_frame(&mut capture);
        assert_eq!(frame.get_pixel(0, 0)[0], 9);
        assert!(capture.try_next().unwrap().is_none());
        assert_eq!(capture.frame_size(), (2, 2));
    }

    fn first_channel(source: &mut CaptureSource) -> u8 {
        poll_until_frame(source).get_pixel(0, 0)[0]
    }

    #[test]
    fn slow_consumer_sees_every_frame_in_order() {
        let inner =
            MemorySource::solid(1, 1, &[[1, 0, 0, 255], [2, 0, 0, 255], [3, 0, 0, 255]]).unwrap();
        let mut capture = CaptureSource::spawn(inner, Duration::from_millis(1)).unwrap();
        let mut seen = Vec::new();
        for _ in 0..5 {
            thread::sleep(Duration::from_millis(10));
            seen.push(first_channel(&mut capture));
        }
        assert_eq!(seen, [1, 2, 3, 1, 2]);
    }

    #[test]
    fn rewind_restarts_the_inner_sequence() {
        let inner = MemorySource::solid(1, 1, &[[1, 0, 0, 255], [2, 0, 0, 255]]).unwrap();
        let mut capture = CaptureSource::spawn(inner, Duration::from_millis(1)).unwrap();
        assert_eq!(first_channel(&mut capture), 1);
        // Let the worker park the second frame before rewinding.
        thread::sleep(Duration::from_millis(10));
        capture.rewind().unwrap();
        assert_eq!(first_channel(&mut capture), 1);
        assert_eq!(first_channel(&mut capture), 2);

        for _ in 0..50 {
            capture.rewind().unwrap();
            assert_eq!(first_channel(&mut capture), 1);
        }
    }
}
