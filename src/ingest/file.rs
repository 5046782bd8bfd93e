//! Recorded video played back from disk.
//!
//! Files are decoded by FFmpeg (feature: ingest-file-ffmpeg) and paced to the
//! configured rate. A file is seekable: at end-of-stream the pipeline rewinds
//! it and playback loops. Only local paths are accepted, never URLs.
//!
//! `stub://<scene>` paths yield a finite synthetic recording so looping can be
//! exercised without a codec.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::SyntheticScene;
use super::{FrameSource, Pacer, SourceStats};
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Path on disk, e.g. `/var/lib/lotwatch/parking.mp4`, or `stub://<scene>`.
    pub path: String,
    /// Playback rate in frames per second. Zero plays as fast as frames decode.
    pub target_fps: u32,
    /// Frame width for synthetic scenes.
    pub width: u32,
    /// Frame height for synthetic scenes.
    pub height: u32,
    /// Number of frames a synthetic scene yields before end-of-stream.
    pub synthetic_frames: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            target_fps: 10,
            width: 640,
            height: 480,
            synthetic_frames: 300,
        }
    }
}

/// Seekable frame source for recordings.
pub struct FileSource {
    playback: Playback,
    pacer: Pacer,
    rewinds: u64,
}

enum Playback {
    Stub(StubFile),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Decoded(FfmpegFileSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "'{}' is not a local path; recordings are read from disk only",
                config.path
            ));
        }
        let pacer = Pacer::new(config.target_fps);
        let playback = if config.path.starts_with("stub://") {
            Playback::Stub(StubFile::new(config))
        } else {
            if !std::path::Path::new(&config.path).is_file() {
                return Err(anyhow!("video file '{}' does not exist", config.path));
            }
            open_decoder(config)?
        };
        Ok(Self {
            playback,
            pacer,
            rewinds: 0,
        })
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.playback {
            Playback::Stub(stub) => {
                log::info!("FileSource: {} is a synthetic recording", stub.config.path);
                Ok(())
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            Playback::Decoded(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.pacer.wait();
        match &mut self.playback {
            Playback::Stub(source) => Ok(source.next_frame()),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Playback::Decoded(source) => source.next_frame(),
        }
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn rewind(&mut self) -> Result<()> {
        self.rewinds += 1;
        match &mut self.playback {
            Playback::Stub(source) => {
                source.rewind();
                Ok(())
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            Playback::Decoded(source) => source.rewind(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.playback {
            Playback::Stub(_) => true,
            #[cfg(feature = "ingest-file-ffmpeg")]
            Playback::Decoded(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        let (frames_captured, location) = match &self.playback {
            Playback::Stub(source) => (source.produced, source.config.path.clone()),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Playback::Decoded(source) => (source.frames_captured(), source.path().to_string()),
        };
        SourceStats {
            frames_captured,
            rewinds: self.rewinds,
            location,
        }
    }
}

struct StubFile {
    config: FileConfig,
    scene: SyntheticScene,
    /// Position inside the current playback pass.
    position: u64,
    /// Frames produced across all passes.
    produced: u64,
}

impl StubFile {
    fn new(config: FileConfig) -> Self {
        let scene = SyntheticScene::from_location(&config.path);
        Self {
            config,
            scene,
            position: 0,
            produced: 0,
        }
    }

    fn next_frame(&mut self) -> Option<Frame> {
        if self.position >= self.config.synthetic_frames {
            return None;
        }
        let frame = self
            .scene
            .render(self.config.width, self.config.height, self.position);
        self.position += 1;
        self.produced += 1;
        Some(frame)
    }

    fn rewind(&mut self) {
        self.position = 0;
    }
}

fn open_decoder(config: FileConfig) -> Result<Playback> {
    #[cfg(feature = "ingest-file-ffmpeg")]
    {
        Ok(Playback::Decoded(FfmpegFileSource::new(config)?))
    }
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    {
        Err(anyhow!(
            "cannot decode '{}': built without the ingest-file-ffmpeg feature",
            config.path
        ))
    }
}

/// Stub scenes, or plain paths without a URL scheme.
fn is_local_file_path(path: &str) -> bool {
    match path.trim() {
        "" => false,
        p => p.starts_with("stub://") || !p.contains("://"),
    }
}
