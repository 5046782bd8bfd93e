//! Live camera streams over RTSP.
//!
//! Real `rtsp://` URLs are decoded by GStreamer (feature: rtsp-gstreamer) into
//! RGB24 frames. `stub://<scene>` URLs render a synthetic scene instead so the
//! plate pipeline can run without a camera.
//!
//! A live stream has no beginning to return to: `rewind` always fails and
//! end-of-stream is final.

use anyhow::{bail, Result};

use super::synthetic::SyntheticScene;
use super::{FrameSource, Pacer, SourceStats};
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// Camera URL, e.g. `rtsp://10.0.0.20:554/stream1`, or `stub://<scene>`.
    pub url: String,
    /// Pacing for synthetic streams; also sizes the stall timeout of real ones.
    pub target_fps: u32,
    /// Synthetic frame size. Real streams use the camera's resolution.
    pub width: u32,
    pub height: u32,
    /// End a synthetic stream after this many frames. `None` never ends.
    pub max_frames: Option<u64>,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
            max_frames: None,
        }
    }
}

/// Non-seekable frame source for camera streams.
pub struct RtspSource {
    stream: Stream,
}

enum Stream {
    Stub(StubStream),
    #[cfg(feature = "rtsp-gstreamer")]
    Gst(gst::GstStream),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self> {
        let stream = if config.url.starts_with("stub://") {
            Stream::Stub(StubStream::new(config))
        } else {
            Self::open_camera(config)?
        };
        Ok(Self { stream })
    }

    #[cfg(feature = "rtsp-gstreamer")]
    fn open_camera(config: RtspConfig) -> Result<Stream> {
        Ok(Stream::Gst(gst::GstStream::open(config)?))
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    fn open_camera(config: RtspConfig) -> Result<Stream> {
        bail!(
            "cannot open '{}': built without the rtsp-gstreamer feature",
            config.url
        )
    }
}

impl FrameSource for RtspSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.stream {
            Stream::Stub(stub) => {
                log::info!("RtspSource: {} is a synthetic stream", stub.config.url);
                Ok(())
            }
            #[cfg(feature = "rtsp-gstreamer")]
            Stream::Gst(gst) => gst.play(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.stream {
            Stream::Stub(stub) => Ok(stub.next_frame()),
            #[cfg(feature = "rtsp-gstreamer")]
            Stream::Gst(gst) => gst.next_frame(),
        }
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn rewind(&mut self) -> Result<()> {
        bail!("a live stream has no start to rewind to")
    }

    fn is_healthy(&self) -> bool {
        match &self.stream {
            Stream::Stub(_) => true,
            #[cfg(feature = "rtsp-gstreamer")]
            Stream::Gst(gst) => gst.health.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        let (frames_captured, url) = match &self.stream {
            Stream::Stub(stub) => (stub.rendered, &stub.config.url),
            #[cfg(feature = "rtsp-gstreamer")]
            Stream::Gst(gst) => (gst.received, &gst.url),
        };
        SourceStats {
            frames_captured,
            rewinds: 0,
            location: url.clone(),
        }
    }
}

struct StubStream {
    config: RtspConfig,
    scene: SyntheticScene,
    pacer: Pacer,
    rendered: u64,
}

impl StubStream {
    fn new(config: RtspConfig) -> Self {
        Self {
            scene: SyntheticScene::from_location(&config.url),
            pacer: Pacer::new(config.target_fps),
            rendered: 0,
            config,
        }
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if let Some(max) = self.config.max_frames {
            if self.rendered >= max {
                return None;
            }
        }
        self.pacer.wait();
        let frame = self
            .scene
            .render(self.config.width, self.config.height, self.rendered);
        self.rendered += 1;
        Some(frame)
    }
}

#[cfg(feature = "rtsp-gstreamer")]
mod gst {
    use anyhow::{anyhow, bail, Context, Result};
    use gstreamer::prelude::*;
    use gstreamer::{ClockTime, MessageView, State};
    use gstreamer_app::AppSink;

    use super::RtspConfig;
    use crate::frame::Frame;
    use crate::ingest::DecodeHealth;

    const SINK_NAME: &str = "frames";

    /// `rtspsrc ! decodebin ! videoconvert ! appsink`, keeping only the newest buffer.
    pub(super) struct GstStream {
        pub(super) url: String,
        pipeline: gstreamer::Pipeline,
        sink: AppSink,
        pull_timeout: ClockTime,
        ended: bool,
        pub(super) received: u64,
        pub(super) health: DecodeHealth,
    }

    impl GstStream {
        pub(super) fn open(config: RtspConfig) -> Result<Self> {
            gstreamer::init().context("gstreamer init")?;
            let description = format!(
                "rtspsrc location={url} latency=0 ! decodebin ! videoconvert \
                 ! video/x-raw,format=RGB \
                 ! appsink name={SINK_NAME} sync=false max-buffers=1 drop=true",
                url = config.url
            );
            let pipeline = gstreamer::parse::launch(&description)
                .with_context(|| format!("gstreamer pipeline for {}", config.url))?
                .dynamic_cast::<gstreamer::Pipeline>()
                .map_err(|_| anyhow!("parsed description is not a pipeline"))?;
            let sink = pipeline
                .by_name(SINK_NAME)
                .and_then(|element| element.dynamic_cast::<AppSink>().ok())
                .ok_or_else(|| anyhow!("pipeline has no appsink named '{SINK_NAME}'"))?;

            // Four frame periods, at least half a second.
            let pull_ms = match config.target_fps {
                0 => 500,
                fps => (4_000 / u64::from(fps)).max(500),
            };

            Ok(Self {
                pipeline,
                sink,
                pull_timeout: ClockTime::from_mseconds(pull_ms),
                ended: false,
                received: 0,
                health: DecodeHealth::new(config.target_fps),
                url: config.url,
            })
        }

        pub(super) fn play(&mut self) -> Result<()> {
            self.pipeline
                .set_state(State::Playing)
                .with_context(|| format!("start playing {}", self.url))?;
            self.health.connected();
            log::info!("RtspSource: playing {}", self.url);
            Ok(())
        }

        pub(super) fn next_frame(&mut self) -> Result<Option<Frame>> {
            loop {
                self.check_bus()?;
                if self.ended || self.sink.is_eos() {
                    return Ok(None);
                }
                if let Some(sample) = self.sink.try_pull_sample(self.pull_timeout) {
                    let frame = sample_frame(&sample)?;
                    self.received += 1;
                    self.health.frame();
                    return Ok(Some(frame));
                }
                if !self.health.is_healthy() {
                    bail!("no frames from {} within the stall window", self.url);
                }
            }
        }

        /// Drain pending bus messages. A pipeline error fails every later read.
        fn check_bus(&mut self) -> Result<()> {
            if let Some(bus) = self.pipeline.bus() {
                while let Some(message) = bus.pop() {
                    match message.view() {
                        MessageView::Error(err) => {
                            let origin = err.src().map(|s| s.path_string().to_string());
                            self.health.fail(format!(
                                "{} (from {})",
                                err.error(),
                                origin.as_deref().unwrap_or("unknown element")
                            ));
                        }
                        MessageView::Eos(_) => {
                            log::info!("RtspSource: {} closed the stream", self.url);
                            self.ended = true;
                        }
                        _ => {}
                    }
                }
            }
            match self.health.failure() {
                Some(reason) => bail!("{} failed: {}", self.url, reason),
                None => Ok(()),
            }
        }
    }

    impl Drop for GstStream {
        fn drop(&mut self) {
            let _ = self.pipeline.set_state(State::Null);
        }
    }

    fn sample_frame(sample: &gstreamer::Sample) -> Result<Frame> {
        let caps = sample.caps().context("sample without caps")?;
        let info = gstreamer_video::VideoInfo::from_caps(caps).context("caps are not raw video")?;
        let buffer = sample.buffer().context("sample without a buffer")?;
        let map = buffer.map_readable().context("buffer is not readable")?;
        let stride = usize::try_from(info.stride()[0]).context("negative row stride")?;
        Frame::from_strided(map.as_slice(), stride, info.width(), info.height())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(max_frames: Option<u64>) -> RtspConfig {
        RtspConfig {
            url: "stub://traffic".to_string(),
            target_fps: 0,
            width: 320,
            height: 240,
            max_frames,
        }
    }

    #[test]
    fn rtsp_source_produces_frames() -> Result<()> {
        let mut source = RtspSource::new(stub_config(None))?;
        source.connect()?;

        let frame = source.next_frame()?.expect("frame");
        assert_eq!(frame.width, 320);
        assert_eq!(frame.height, 240);
        Ok(())
    }

    #[test]
    fn bounded_stream_ends_and_cannot_rewind() -> Result<()> {
        let mut source = RtspSource::new(stub_config(Some(2)))?;
        source.connect()?;

        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert!(!source.is_seekable());
        assert!(source.rewind().is_err());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    #[test]
    fn real_urls_need_gstreamer() {
        assert!(RtspSource::new(RtspConfig::default()).is_err());
    }
}
