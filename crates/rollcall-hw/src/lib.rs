//! rollcall-hw — Video input for the attendance terminal.
//!
//! Provides V4L2 live capture, playback of recorded video files (GStreamer,
//! `video` feature) and frame directories, and the
//! frame-level image operations the pipeline needs (downscale, lighting
//! normalization, crop, box and label drawing).

pub mod camera;
pub mod frame;
pub mod playback;
pub mod source;
#[cfg(feature = "video")]
pub mod video;

pub use camera::Camera;
pub use frame::{Frame, FrameError, LabelFont, Region};
pub use playback::DirectoryPlayback;
pub use source::{
    DefaultBackend, Progress, SourceError, SourceKind, SourceSpec, VideoBackend, VideoSource,
};
#[cfg(feature = "video")]
pub use video::VideoFilePlayback;
