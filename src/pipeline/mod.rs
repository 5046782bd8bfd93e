//! Pipeline loops.
//!
//! Each pipeline is a single-threaded loop on its own thread that owns its
//! frame source, its state and its backends. Per iteration it:
//! 1. Checks the stop flag, then waits out a pause without touching the source
//! 2. Pulls one frame and reports the source's health on the control
//! 3. Hands the frame to the pipeline stage and publishes a snapshot
//!
//! At end-of-stream a seekable source is rewound and the loop continues; a
//! live source ends the loop. The frame counter keeps counting across rewinds.

mod channel;
mod control;
mod parking;
mod plates;

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::frame::Frame;
use crate::ingest::FrameSource;

pub use channel::{latest, ChannelStats, SnapshotReceiver, SnapshotSender};
pub use control::{PipelineControl, PAUSE_POLL};
pub use parking::{ParkingPipeline, ParkingSnapshot, SpotAnnotation};
pub use plates::{PlatePipeline, PlateSnapshot, VehicleAnnotation};

/// Consecutive read failures after which the loop gives up.
pub const MAX_CONSECUTIVE_READ_ERRORS: u32 = 50;

const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Counters for a finished loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub rewinds: u64,
    pub read_errors: u64,
}

/// Drive `source` until stopped, a live stream ends, or `frame_limit` frames
/// were handed to `on_frame`.
///
/// `on_frame` receives each frame with its index, counted from zero and never
/// reset. Connecting the source is the only fatal step besides a source that
/// keeps failing or yields nothing after a rewind.
pub fn run_source<F>(
    name: &str,
    source: &mut dyn FrameSource,
    control: &PipelineControl,
    frame_limit: Option<u64>,
    mut on_frame: F,
) -> Result<LoopStats>
where
    F: FnMut(u64, Frame),
{
    source
        .connect()
        .with_context(|| format!("{} pipeline: connecting {}", name, source.stats().location))?;
    log::info!("{} pipeline started on {}", name, source.stats().location);
    control.report_source_health(name, source.is_healthy());

    let mut stats = LoopStats::default();
    let mut consecutive_errors = 0u32;
    let mut frames_since_rewind = 0u64;

    loop {
        if control.is_stopped() || !control.wait_while_paused() {
            log::info!("{} pipeline stop requested", name);
            break;
        }
        if frame_limit.is_some_and(|limit| stats.frames >= limit) {
            log::info!("{} pipeline reached its {} frame limit", name, stats.frames);
            break;
        }

        let next = source.next_frame();
        control.report_source_health(name, source.is_healthy());
        match next {
            Ok(Some(frame)) => {
                consecutive_errors = 0;
                frames_since_rewind += 1;
                on_frame(stats.frames, frame);
                stats.frames += 1;
            }
            Ok(None) => {
                if !source.is_seekable() {
                    log::info!("{} pipeline: live stream ended", name);
                    break;
                }
                if frames_since_rewind == 0 && stats.rewinds > 0 {
                    bail!("{} pipeline: source yields no frames after rewind", name);
                }
                source
                    .rewind()
                    .with_context(|| format!("{} pipeline: rewinding source", name))?;
                stats.rewinds += 1;
                frames_since_rewind = 0;
                log::info!("{} pipeline: end of file, looping", name);
            }
            Err(err) => {
                stats.read_errors += 1;
                consecutive_errors += 1;
                log::warn!("{} pipeline: frame read failed: {:#}", name, err);
                if !source.is_seekable() {
                    log::info!("{} pipeline: live stream lost", name);
                    break;
                }
                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    bail!(
                        "{} pipeline: {} consecutive frame read failures",
                        name,
                        consecutive_errors
                    );
                }
                if consecutive_errors == 1 {
                    source
                        .rewind()
                        .with_context(|| format!("{} pipeline: rewinding source", name))?;
                    stats.rewinds += 1;
                    frames_since_rewind = 0;
                } else {
                    std::thread::sleep(READ_ERROR_BACKOFF);
                }
            }
        }
    }

    log::info!(
        "{} pipeline stopped after {} frames ({} rewinds, {} read errors)",
        name,
        stats.frames,
        stats.rewinds,
        stats.read_errors
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SourceStats;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Finite source yielding `len` gray frames, counting every pull.
    struct CountingSource {
        len: u64,
        position: u64,
        seekable: bool,
        pulls: Arc<AtomicU64>,
        rewinds: u64,
        delay: Duration,
        healthy: bool,
    }

    impl CountingSource {
        fn new(len: u64, seekable: bool) -> Self {
            Self {
                len,
                position: 0,
                seekable,
                pulls: Arc::new(AtomicU64::new(0)),
                rewinds: 0,
                delay: Duration::ZERO,
                healthy: true,
            }
        }
    }

    impl FrameSource for CountingSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.position >= self.len {
                return Ok(None);
            }
            self.position += 1;
            Ok(Some(Frame::filled(4, 4, [self.position as u8; 3])))
        }

        fn is_seekable(&self) -> bool {
            self.seekable
        }

        fn rewind(&mut self) -> Result<()> {
            self.position = 0;
            self.rewinds += 1;
            Ok(())
        }

        fn is_healthy(&self) -> bool {
            self.healthy
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.position,
                rewinds: self.rewinds,
                location: "counting".to_string(),
            }
        }
    }

    #[test]
    fn seekable_source_loops_with_monotonic_indices() -> Result<()> {
        let mut source = CountingSource::new(3, true);
        let mut seen = Vec::new();
        let stats = run_source("test", &mut source, &PipelineControl::new(), Some(7), |i, f| {
            seen.push((i, f.pixel(0, 0).map(|p| p[0])));
        })?;
        assert_eq!(stats.frames, 7);
        assert_eq!(stats.rewinds, 2);
        let indices: Vec<u64> = seen.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, (0..7).collect::<Vec<_>>());
        let shades: Vec<Option<u8>> = seen.iter().map(|(_, s)| *s).collect();
        assert_eq!(
            shades,
            [1, 2, 3, 1, 2, 3, 1].iter().map(|&s| Some(s)).collect::<Vec<_>>()
        );
        Ok(())
    }

    #[test]
    fn live_source_ends_the_loop() -> Result<()> {
        let mut source = CountingSource::new(4, false);
        let mut count = 0;
        let stats = run_source("test", &mut source, &PipelineControl::new(), None, |_, _| {
            count += 1
        })?;
        assert_eq!(count, 4);
        assert_eq!(stats.rewinds, 0);
        Ok(())
    }

    #[test]
    fn source_health_is_reported_on_the_control() -> Result<()> {
        let control = PipelineControl::new();
        let mut source = CountingSource::new(2, false);
        source.healthy = false;
        run_source("test", &mut source, &control, None, |_, _| {})?;
        assert!(!control.is_source_healthy());

        let mut source = CountingSource::new(2, false);
        run_source("test", &mut source, &control, None, |_, _| {})?;
        assert!(control.is_source_healthy());
        Ok(())
    }

    #[test]
    fn empty_seekable_source_is_an_error() {
        let mut source = CountingSource::new(0, true);
        let result = run_source("test", &mut source, &PipelineControl::new(), None, |_, _| {});
        assert!(result.is_err());
    }

    #[test]
    fn stopped_control_consumes_nothing() -> Result<()> {
        let mut source = CountingSource::new(10, true);
        let pulls = source.pulls.clone();
        let control = PipelineControl::new();
        control.stop();
        let stats = run_source("test", &mut source, &control, None, |_, _| {})?;
        assert_eq!(stats.frames, 0);
        assert_eq!(pulls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn pause_halts_frame_consumption() {
        let mut source = CountingSource::new(1_000_000, true);
        source.delay = Duration::from_millis(2);
        let pulls = source.pulls.clone();
        let control = PipelineControl::new();
        let loop_control = control.clone();
        let handle = std::thread::spawn(move || {
            run_source("test", &mut source, &loop_control, None, |_, _| {})
        });

        std::thread::sleep(Duration::from_millis(50));
        control.pause();
        // Let an in-flight iteration finish.
        std::thread::sleep(Duration::from_millis(150));
        let paused_at = pulls.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(pulls.load(Ordering::SeqCst), paused_at);

        control.resume();
        std::thread::sleep(Duration::from_millis(100));
        assert!(pulls.load(Ordering::SeqCst) > paused_at);

        control.stop();
        let stats = handle.join().ok().and_then(|r| r.ok());
        assert!(stats.is_some_and(|s| s.frames > 0));
    }
}
