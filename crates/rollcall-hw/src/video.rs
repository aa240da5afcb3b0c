//! Recorded playback from a video file, decoded by GStreamer.
//!
//! `decodebin` picks the demuxer and decoder; frames come out of an appsink
//! as packed RGB. Progress uses the container duration and the stream's
//! frame rate, and each frame's presentation timestamp as its offset.

use crate::frame::Frame;
use crate::source::{Progress, SourceError, SourceKind, VideoSource};
use gstreamer::prelude::*;
use gstreamer::{ClockTime, MessageView, Pipeline, State};
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::path::Path;
use std::time::Duration;

const PIPELINE: &str = "filesrc name=src ! decodebin ! videoconvert ! \
     video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4 enable-last-sample=false";

/// Upper bound on opening and prerolling a file.
const PREROLL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct VideoFilePlayback {
    pipeline: Pipeline,
    appsink: AppSink,
    read_timeout: Duration,
    total: u64,
    read: u64,
    last_position_ms: u64,
    released: bool,
}

impl VideoFilePlayback {
    pub fn open(path: &Path, read_timeout: Duration) -> Result<Self, SourceError> {
        let fail = |what: &str, e: &dyn std::fmt::Display| {
            SourceError::Playback(format!("{}: {what}: {e}", path.display()))
        };

        gstreamer::init().map_err(|e| fail("initializing GStreamer", &e))?;

        let pipeline = gstreamer::parse::launch(PIPELINE)
            .map_err(|e| fail("creating pipeline", &e))?
            .downcast::<Pipeline>()
            .map_err(|_| fail("creating pipeline", &"not a pipeline"))?;
        let src = pipeline
            .by_name("src")
            .ok_or_else(|| fail("creating pipeline", &"missing filesrc"))?;
        src.set_property("location", path.to_string_lossy().as_ref());
        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| fail("creating pipeline", &"missing appsink"))?
            .downcast::<AppSink>()
            .map_err(|_| fail("creating pipeline", &"sink is not an appsink"))?;

        let mut playback = Self {
            pipeline,
            appsink,
            read_timeout,
            total: 0,
            read: 0,
            last_position_ms: 0,
            released: false,
        };

        // Preroll so duration and caps are known before the first read
        playback
            .pipeline
            .set_state(State::Paused)
            .map_err(|e| fail("opening", &e))?;
        let (prerolled, _, _) = playback
            .pipeline
            .state(ClockTime::from_mseconds(PREROLL_TIMEOUT.as_millis() as u64));
        if let Err(e) = prerolled {
            let detail = playback.bus_error().unwrap_or_else(|| e.to_string());
            return Err(fail("not a playable video", &detail));
        }

        playback.total = playback.total_frames();
        playback
            .pipeline
            .set_state(State::Playing)
            .map_err(|e| fail("starting playback", &e))?;

        tracing::info!(
            path = %path.display(),
            total_frames = playback.total,
            "opened video file"
        );
        Ok(playback)
    }

    /// Duration times frame rate, or 0 when either is unknown.
    fn total_frames(&self) -> u64 {
        let Some(duration) = self.pipeline.query_duration::<ClockTime>() else {
            return 0;
        };
        let Some(info) = self
            .appsink
            .static_pad("sink")
            .and_then(|pad| pad.current_caps())
            .and_then(|caps| VideoInfo::from_caps(&caps).ok())
        else {
            return 0;
        };
        let fps = info.fps();
        if fps.numer() <= 0 || fps.denom() <= 0 {
            return 0;
        }
        let frames = duration.mseconds() as f64 * fps.numer() as f64 / (fps.denom() as f64 * 1000.0);
        frames.round() as u64
    }

    /// First pending error message on the pipeline bus.
    fn bus_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gstreamer::MessageType::Error])?;
        match msg.view() {
            MessageView::Error(err) => Some(match err.debug() {
                Some(debug) => format!("{} ({debug})", err.error()),
                None => err.error().to_string(),
            }),
            _ => None,
        }
    }

    fn frame_from_sample(&self, sample: &gstreamer::Sample) -> Result<(Frame, Option<u64>), SourceError> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| SourceError::Playback("sample without buffer".into()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| SourceError::Playback("sample without caps".into()))?;
        let info = VideoInfo::from_caps(caps)
            .map_err(|e| SourceError::Playback(format!("reading video caps: {e}")))?;
        let map = buffer
            .map_readable()
            .map_err(|e| SourceError::Playback(format!("mapping buffer: {e}")))?;

        let (width, height) = (info.width(), info.height());
        let row = width as usize * 3;
        let stride = info.stride().first().copied().unwrap_or(0).max(0) as usize;
        let data = pack_rows(map.as_slice(), row, stride.max(row), height as usize)?;

        let frame = Frame::new(data, width, height, self.read as u32)
            .map_err(|e| SourceError::Playback(e.to_string()))?;
        Ok((frame, buffer.pts().map(|pts| pts.mseconds())))
    }
}

/// Drop per-row padding from a strided RGB plane.
fn pack_rows(plane: &[u8], row: usize, stride: usize, height: usize) -> Result<Vec<u8>, SourceError> {
    if height == 0 {
        return Ok(Vec::new());
    }
    let needed = stride * (height - 1) + row;
    if plane.len() < needed {
        return Err(SourceError::Playback(format!(
            "short video buffer: expected {needed} bytes, got {}",
            plane.len()
        )));
    }
    if stride == row {
        return Ok(plane[..row * height].to_vec());
    }
    let mut data = Vec::with_capacity(row * height);
    for y in 0..height {
        data.extend_from_slice(&plane[y * stride..y * stride + row]);
    }
    Ok(data)
}

impl VideoSource for VideoFilePlayback {
    fn kind(&self) -> SourceKind {
        SourceKind::File
    }

    fn read(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.released {
            return Ok(None);
        }
        let timeout = ClockTime::from_mseconds(self.read_timeout.as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            if self.appsink.is_eos() {
                tracing::debug!(frames = self.read, "video file ended");
                return Ok(None);
            }
            return Err(match self.bus_error() {
                Some(detail) => SourceError::Playback(detail),
                None => SourceError::Timeout(self.read_timeout),
            });
        };

        let (frame, pts_ms) = self.frame_from_sample(&sample)?;
        self.read += 1;
        if let Some(ms) = pts_ms {
            self.last_position_ms = ms;
        }
        Ok(Some(frame))
    }

    fn progress(&self) -> Option<Progress> {
        Some(Progress {
            position: self.read,
            total: self.total.max(self.read),
            position_ms: self.last_position_ms,
        })
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.pipeline.set_state(State::Null) {
            tracing::warn!(error = %e, "failed to stop video pipeline");
        }
    }
}

impl Drop for VideoFilePlayback {
    fn drop(&mut self) {
        self.release();
    }
}
