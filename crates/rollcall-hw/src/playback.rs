//! Recorded playback from a directory of still frames.
//!
//! Frames are read in lexical filename order (`frame_00001.png`, ...). The
//! nominal frame rate turns the frame index into a video-native offset.

use crate::frame::Frame;
use crate::source::{Progress, SourceError, SourceKind, VideoSource};
use std::path::{Path, PathBuf};

const FRAME_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "ppm"];

pub struct DirectoryPlayback {
    frames: Vec<PathBuf>,
    next: usize,
    fps: f32,
    released: bool,
}

impl DirectoryPlayback {
    pub fn open(dir: &Path, fps: f32) -> Result<Self, SourceError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| SourceError::Playback(format!("{}: {e}", dir.display())))?;

        let mut frames: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        frames.sort();

        if frames.is_empty() {
            return Err(SourceError::Playback(format!(
                "{}: no frame images found",
                dir.display()
            )));
        }

        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 25.0 };
        tracing::info!(dir = %dir.display(), frames = frames.len(), fps, "opened playback");

        Ok(Self {
            frames,
            next: 0,
            fps,
            released: false,
        })
    }

    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }
}

impl VideoSource for DirectoryPlayback {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn read(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.released {
            return Ok(None);
        }
        let Some(path) = self.frames.get(self.next) else {
            return Ok(None);
        };

        let img = image::open(path)
            .map_err(|e| SourceError::Playback(format!("{}: {e}", path.display())))?
            .to_rgb8();
        let frame = Frame::from_rgb_image(img, self.next as u32);
        self.next += 1;
        Ok(Some(frame))
    }

    fn progress(&self) -> Option<Progress> {
        let position = self.next as u64;
        let last_index = position.saturating_sub(1) as f32;
        Some(Progress {
            position,
            total: self.frames.len() as u64,
            position_ms: (last_index * 1000.0 / self.fps).round() as u64,
        })
    }

    fn release(&mut self) {
        self.released = true;
    }
}
