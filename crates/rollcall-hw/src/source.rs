//! Video source abstraction shared by live devices and recorded playback.

use crate::camera::Camera;
use crate::frame::Frame;
use crate::playback::DirectoryPlayback;
#[cfg(feature = "video")]
use crate::video::VideoFilePlayback;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("read timed out after {0:?}")]
    Timeout(Duration),
    #[error("playback failed: {0}")]
    Playback(String),
}

/// Whether frames arrive in real time or from a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Live,
    File,
}

/// Playback position of a recorded source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Frames consumed so far.
    pub position: u64,
    pub total: u64,
    /// Video-native offset of the last frame read.
    pub position_ms: u64,
}

impl Progress {
    /// Fraction of the recording consumed, in [0, 1].
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.position as f32 / self.total as f32).min(1.0)
    }
}

/// What to open: a V4L2 device, a video file or a directory of recorded frames.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    Device(String),
    VideoFile(PathBuf),
    Directory { path: PathBuf, fps: f32 },
}

impl SourceSpec {
    /// Interpret a user-supplied device index, device path, video file or
    /// frame directory.
    ///
    /// `"0"` becomes `/dev/video0`; an existing regular file is a video and an
    /// existing directory is frame playback. Device nodes are not regular files.
    pub fn parse(input: &str, playback_fps: f32) -> Self {
        if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
            return SourceSpec::Device(format!("/dev/video{input}"));
        }
        let path = Path::new(input);
        if path.is_file() {
            SourceSpec::VideoFile(path.to_path_buf())
        } else if path.is_dir() {
            SourceSpec::Directory {
                path: path.to_path_buf(),
                fps: playback_fps,
            }
        } else {
            SourceSpec::Device(input.to_string())
        }
    }
}

/// An opened stream of frames.
pub trait VideoSource: Send {
    fn kind(&self) -> SourceKind;

    /// Next frame, or `Ok(None)` at end of stream.
    fn read(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Position within a recording; live sources have none.
    fn progress(&self) -> Option<Progress> {
        None
    }

    /// Release the underlying handle. Reads after release return end of stream.
    fn release(&mut self);
}

/// Opens [`VideoSource`]s from a [`SourceSpec`].
pub trait VideoBackend: Send + Sync {
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn VideoSource>, SourceError>;
}

/// Backend for real hardware and on-disk recordings.
pub struct DefaultBackend {
    /// Upper bound on a single blocking device read.
    pub read_timeout: Duration,
}

impl VideoBackend for DefaultBackend {
    fn open(&self, spec: &SourceSpec) -> Result<Box<dyn VideoSource>, SourceError> {
        match spec {
            SourceSpec::Device(path) => Ok(Box::new(Camera::open(path, self.read_timeout)?)),
            SourceSpec::VideoFile(path) => open_video_file(path, self.read_timeout),
            SourceSpec::Directory { path, fps } => {
                Ok(Box::new(DirectoryPlayback::open(path, *fps)?))
            }
        }
    }
}

#[cfg(feature = "video")]
fn open_video_file(path: &Path, read_timeout: Duration) -> Result<Box<dyn VideoSource>, SourceError> {
    Ok(Box::new(VideoFilePlayback::open(path, read_timeout)?))
}

#[cfg(not(feature = "video"))]
fn open_video_file(path: &Path, _read_timeout: Duration) -> Result<Box<dyn VideoSource>, SourceError> {
    Err(SourceError::Playback(format!(
        "{}: built without video file support (enable the `video` feature)",
        path.display()
    )))
}
