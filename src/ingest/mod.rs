//! Frame ingestion sources.
//!
//! This module provides the sources both pipelines pull frames from:
//! - Local video files (seekable, looped at end-of-stream; feature: ingest-file-ffmpeg)
//! - RTSP streams (live, end-of-stream is terminal; feature: rtsp-gstreamer)
//! - Synthetic `stub://` scenes for tests and the demo binary
//!
//! Every source hands out owned `Frame`s. The pipeline may keep a frame after the
//! next call; sources never reuse a buffer they have already returned.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod rtsp;
pub mod synthetic;

use anyhow::Result;
use std::time::{Duration, Instant};

use crate::frame::Frame;

pub use file::{FileConfig, FileSource};
pub use rtsp::{RtspConfig, RtspSource};
pub use synthetic::SyntheticScene;

/// A stream of frames.
///
/// `next_frame` returns `Ok(None)` at end-of-stream. Seekable sources can be
/// rewound and continue from their first frame; live sources cannot.
pub trait FrameSource: Send {
    /// Open the underlying stream.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// True when `rewind` can restart the stream.
    fn is_seekable(&self) -> bool;

    /// Seek back to the first frame.
    fn rewind(&mut self) -> Result<()>;

    /// False while the source is failing or stalled. Checked by the pipeline
    /// loop after every read and shown in the daemon's health line.
    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub rewinds: u64,
    pub location: String,
}

/// Settings shared by every source kind.
#[derive(Clone, Debug)]
pub struct SourceSettings {
    /// File path, `rtsp://` URL or `stub://<scene>`.
    pub location: String,
    /// Treat the source as a live stream even if it is a file.
    pub live: bool,
    /// Target frame rate. Zero disables pacing.
    pub target_fps: u32,
    /// Frame size for synthetic scenes.
    pub width: u32,
    pub height: u32,
    /// Length of a synthetic stream before end-of-stream.
    pub synthetic_frames: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            location: "stub://parking".to_string(),
            live: false,
            target_fps: 10,
            width: 640,
            height: 480,
            synthetic_frames: 300,
        }
    }
}

/// Open the source described by `settings`.
///
/// `rtsp://` locations and anything flagged `live` become an `RtspSource`;
/// everything else is a seekable `FileSource`.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    if settings.live || settings.location.starts_with("rtsp://") {
        let source = RtspSource::new(RtspConfig {
            url: settings.location.clone(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
            max_frames: None,
        })?;
        Ok(Box::new(source))
    } else {
        let source = FileSource::new(FileConfig {
            path: settings.location.clone(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
            synthetic_frames: settings.synthetic_frames,
        })?;
        Ok(Box::new(source))
    }
}

/// Sleeps between frames to hold a playback rate.
pub(crate) struct Pacer {
    interval: Option<Duration>,
    last: Option<Instant>,
}

impl Pacer {
    pub(crate) fn new(target_fps: u32) -> Self {
        let interval = (target_fps > 0).then(|| Duration::from_secs_f64(1.0 / target_fps as f64));
        Self {
            interval,
            last: None,
        }
    }

    pub(crate) fn wait(&mut self) {
        if let (Some(interval), Some(last)) = (self.interval, self.last) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

/// Liveness bookkeeping for decoder-backed sources.
///
/// A source is healthy once connected, until it records an error or goes
/// quiet for longer than its grace period. Before the first frame the grace
/// is a fixed startup window. The pipeline loop reports it after every read.
#[cfg(any(feature = "rtsp-gstreamer", feature = "ingest-file-ffmpeg"))]
pub(crate) struct DecodeHealth {
    grace: Duration,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    failure: Option<String>,
}

#[cfg(any(feature = "rtsp-gstreamer", feature = "ingest-file-ffmpeg"))]
impl DecodeHealth {
    const STARTUP_GRACE: Duration = Duration::from_secs(5);

    /// Six frame periods at `target_fps`, never less than two seconds.
    pub(crate) fn new(target_fps: u32) -> Self {
        let floor = Duration::from_secs(2);
        let grace = match target_fps {
            0 => floor,
            fps => (Duration::from_secs(6) / fps).max(floor),
        };
        Self {
            grace,
            connected_at: None,
            last_frame_at: None,
            failure: None,
        }
    }

    pub(crate) fn connected(&mut self) {
        self.connected_at = Some(Instant::now());
    }

    /// A decoded frame. Clears an earlier failure the decoder recovered from.
    pub(crate) fn frame(&mut self) {
        self.last_frame_at = Some(Instant::now());
        self.failure = None;
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
    }

    pub(crate) fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub(crate) fn is_healthy(&self) -> bool {
        if self.failure.is_some() {
            return false;
        }
        match (self.connected_at, self.last_frame_at) {
            (None, _) => false,
            (Some(connected), None) => connected.elapsed() <= Self::STARTUP_GRACE,
            (Some(_), Some(last)) => last.elapsed() <= self.grace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_locations_open_as_seekable_files() -> Result<()> {
        let settings = SourceSettings {
            target_fps: 0,
            ..SourceSettings::default()
        };
        let source = open_source(&settings)?;
        assert!(source.is_seekable());
        Ok(())
    }

    #[test]
    fn live_flag_opens_a_live_source() -> Result<()> {
        let settings = SourceSettings {
            location: "stub://traffic".to_string(),
            live: true,
            target_fps: 0,
            ..SourceSettings::default()
        };
        let source = open_source(&settings)?;
        assert!(!source.is_seekable());
        Ok(())
    }

    #[test]
    fn pacer_without_rate_never_sleeps() {
        let mut pacer = Pacer::new(0);
        let start = Instant::now();
        for _ in 0..100 {
            pacer.wait();
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[cfg(any(feature = "rtsp-gstreamer", feature = "ingest-file-ffmpeg"))]
    #[test]
    fn decode_health_recovers_on_the_next_frame() {
        let mut health = DecodeHealth::new(10);
        assert!(!health.is_healthy());
        health.connected();
        assert!(health.is_healthy());
        health.fail("corrupt packet");
        assert_eq!(health.failure(), Some("corrupt packet"));
        assert!(!health.is_healthy());
        health.frame();
        assert!(health.is_healthy());
    }
}
