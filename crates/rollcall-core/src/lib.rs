//! rollcall-core — Decision pipeline for an unattended attendance terminal.
//!
//! Consumes frames from a [`rollcall_hw::VideoSource`] and detections from a
//! pluggable [`DetectionOracle`], and decides per frame who is present,
//! whether they are live, how they look, and whether attendance or a
//! stranger sighting should be written.

pub mod attendance;
pub mod config;
pub mod emotion;
pub mod engine;
pub mod events;
pub mod liveness;
pub mod matcher;
pub mod notify;
pub mod oracle;
pub mod session;
pub mod stranger;
pub mod types;

pub use attendance::{greeting, AttendanceRecorder, AttendanceStore, RecordOutcome, StoreError};
pub use config::{ConfigError, PipelineConfig};
pub use emotion::EmotionHistory;
pub use engine::{Clock, PipelineError, Terminal, TerminalState};
pub use events::{AnnotationKind, FaceAnnotation, FinishReason, SessionEvent};
pub use liveness::{LivenessConfig, LivenessPhase, LivenessTracker};
pub use matcher::{FaceMatcher, Gallery, MatchResult, Matcher};
pub use notify::{CommandSpeaker, NotificationSink, Speaker, SpeechQueue, TracingSpeaker};
pub use oracle::{DetectionOracle, OracleError};
pub use session::{Session, SessionContext};
pub use stranger::{SpotKey, StrangerConfig, StrangerTracker};
pub use types::{
    AttendanceRecord, BoundingBox, DetectedFace, Emotion, Encoding, FaceLandmarks, Identity, Point,
};
