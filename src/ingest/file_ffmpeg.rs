//! Recorded video decoded with FFmpeg.
//!
//! Packets of the best video stream feed the decoder; decoded pictures are
//! converted to RGB24 at their native size. Running out of packets flushes the
//! decoder, and `rewind` seeks back to zero so the recording can loop.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::file::FileConfig;
use super::DecodeHealth;
use crate::frame::Frame;

use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;

pub(crate) struct FfmpegFileSource {
    config: FileConfig,
    input: ffmpeg::format::context::Input,
    video_stream: usize,
    decoder: ffmpeg::decoder::Video,
    to_rgb: scaling::Context,
    decoded: u64,
    draining: bool,
    health: DecodeHealth,
}

impl FfmpegFileSource {
    pub(crate) fn new(config: FileConfig) -> Result<Self> {
        ffmpeg::init().context("ffmpeg init")?;
        let input = ffmpeg::format::input(&config.path)
            .with_context(|| format!("ffmpeg could not open '{}'", config.path))?;
        let (video_stream, parameters) = {
            let stream = input
                .streams()
                .best(ffmpeg::media::Type::Video)
                .ok_or_else(|| anyhow!("'{}' contains no video stream", config.path))?;
            (stream.index(), stream.parameters())
        };
        let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
            .and_then(|ctx| ctx.decoder().video())
            .with_context(|| format!("no usable video decoder for '{}'", config.path))?;
        let to_rgb = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            scaling::Flags::BILINEAR,
        )
        .context("ffmpeg RGB converter")?;
        let health = DecodeHealth::new(config.target_fps);

        Ok(Self {
            config,
            input,
            video_stream,
            decoder,
            to_rgb,
            decoded: 0,
            draining: false,
            health,
        })
    }

    pub(crate) fn connect(&mut self) -> Result<()> {
        self.health.connected();
        log::info!("FileSource: opened {} with ffmpeg", self.config.path);
        Ok(())
    }

    /// Feed packets until the decoder yields a picture or the file is drained.
    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut picture = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut picture).is_ok() {
                return self.to_frame(&picture).map(Some);
            }
            if self.draining {
                return Ok(None);
            }
            let wanted = self.video_stream;
            let packet = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == wanted)
                .map(|(_, packet)| packet);
            match packet {
                Some(packet) => {
                    if let Err(err) = self.decoder.send_packet(&packet) {
                        self.health.fail(err.to_string());
                        return Err(err).context("ffmpeg rejected a packet");
                    }
                }
                None => {
                    self.decoder.send_eof().context("ffmpeg flush at end of file")?;
                    self.draining = true;
                }
            }
        }
    }

    pub(crate) fn rewind(&mut self) -> Result<()> {
        self.input
            .seek(0, ..)
            .with_context(|| format!("ffmpeg seek to start of '{}'", self.config.path))?;
        self.decoder.flush();
        self.draining = false;
        log::debug!("FileSource: back to the start of {}", self.config.path);
        Ok(())
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    pub(crate) fn frames_captured(&self) -> u64 {
        self.decoded
    }

    pub(crate) fn path(&self) -> &str {
        &self.config.path
    }

    fn to_frame(&mut self, picture: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.to_rgb
            .run(picture, &mut rgb)
            .context("ffmpeg RGB conversion")?;
        let frame = Frame::from_strided(rgb.data(0), rgb.stride(0), rgb.width(), rgb.height())?;
        self.decoded += 1;
        self.health.frame();
        Ok(frame)
    }
}
