//! Events published by a running session.

use crate::types::{AttendanceRecord, BoundingBox, Emotion};
use rollcall_hw::Frame;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationKind {
    /// Matched and live.
    Verified,
    /// Matched, blink still pending.
    AwaitingBlink,
    Stranger,
}

impl AnnotationKind {
    /// Box colour drawn on the published frame.
    pub fn color(&self) -> [u8; 3] {
        match self {
            AnnotationKind::Verified => [0, 200, 0],
            AnnotationKind::AwaitingBlink => [255, 200, 0],
            AnnotationKind::Stranger => [220, 0, 0],
        }
    }
}

/// One labelled face box, in full-resolution frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceAnnotation {
    pub bbox: BoundingBox,
    pub label: String,
    pub kind: AnnotationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    EndOfStream,
    Stopped,
    OpenFailed,
    ReadFailed,
    /// The pipeline panicked mid-session; `detail` carries the panic message.
    Crashed,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Full-resolution frame with boxes drawn. Published for every frame
    /// read, processed or not; `annotations` is empty when unprocessed.
    FrameReady {
        frame: Arc<Frame>,
        annotations: Vec<FaceAnnotation>,
    },
    AttendanceLogged {
        record: AttendanceRecord,
        display_name: String,
    },
    /// Text handed to the notification sink.
    Notification(String),
    StrangerLogged {
        stranger_id: i64,
    },
    /// First appearance of an identity in a recorded source.
    IdentitySeen {
        identity_id: i64,
        display_name: String,
        offset_ms: u64,
    },
    ProgressUpdate {
        fraction: f32,
        position_ms: u64,
    },
    /// Recoverable failure (storage write, oracle error) that did not stop
    /// the session.
    Warning(String),
    SessionFinished {
        reason: FinishReason,
        detail: Option<String>,
    },
}

impl SessionEvent {
    pub fn is_finished(&self) -> bool {
        matches!(self, SessionEvent::SessionFinished { .. })
    }
}

/// Smoothed mood carried alongside an identity's label in annotations.
pub fn identity_label(display_name: &str, emotion: Emotion, verified: bool) -> String {
    if verified {
        format!("{display_name} ({emotion})")
    } else {
        format!("{display_name} - blink to verify")
    }
}
