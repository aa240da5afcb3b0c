//! Blink-based liveness: a matched face must close and reopen its eyes once
//! per session before attendance is taken.

use crate::types::{FaceLandmarks, Point};

/// EAR reported when the eye contour is unavailable. Counts as "open".
pub const OPEN_EAR: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessConfig {
    /// EAR below this counts as eyes closed.
    pub blink_threshold: f32,
    /// Closed frames required before a reopening counts as a blink.
    pub consecutive_frames: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            blink_threshold: 0.26,
            consecutive_frames: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessPhase {
    AwaitingBlink { frames_closed: u32 },
    /// Terminal for the session.
    Verified,
}

/// Per-identity blink state machine.
#[derive(Debug, Clone)]
pub struct LivenessTracker {
    config: LivenessConfig,
    phase: LivenessPhase,
}

impl LivenessTracker {
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            config,
            phase: LivenessPhase::AwaitingBlink { frames_closed: 0 },
        }
    }

    pub fn phase(&self) -> LivenessPhase {
        self.phase
    }

    pub fn is_verified(&self) -> bool {
        self.phase == LivenessPhase::Verified
    }

    /// Skip the blink check (liveness disabled by configuration).
    pub fn verify(&mut self) {
        self.phase = LivenessPhase::Verified;
    }

    /// Feed one EAR sample. Returns whether the identity is now verified.
    pub fn observe(&mut self, ear: f32) -> bool {
        let LivenessPhase::AwaitingBlink { frames_closed } = self.phase else {
            return true;
        };

        if ear < self.config.blink_threshold {
            self.phase = LivenessPhase::AwaitingBlink {
                frames_closed: frames_closed + 1,
            };
        } else if frames_closed >= self.config.consecutive_frames {
            tracing::debug!(frames_closed, "blink observed");
            self.phase = LivenessPhase::Verified;
        } else {
            self.phase = LivenessPhase::AwaitingBlink { frames_closed: 0 };
        }

        self.is_verified()
    }
}

/// Eye Aspect Ratio of a six-point eye contour:
/// `(|p2-p6| + |p3-p5|) / (2 |p1-p4|)`.
///
/// Returns `None` for fewer than six points or a degenerate eye width.
pub fn eye_aspect_ratio(eye: &[Point]) -> Option<f32> {
    if eye.len() < 6 {
        return None;
    }
    let vertical = dist(eye[1], eye[5]) + dist(eye[2], eye[4]);
    let horizontal = dist(eye[0], eye[3]);
    (horizontal > 0.0).then(|| vertical / (2.0 * horizontal))
}

/// Mean EAR of both eyes, or [`OPEN_EAR`] if either eye is missing.
pub fn face_ear(landmarks: &FaceLandmarks) -> f32 {
    match (
        eye_aspect_ratio(&landmarks.left_eye),
        eye_aspect_ratio(&landmarks.right_eye),
    ) {
        (Some(l), Some(r)) => (l + r) / 2.0,
        _ => OPEN_EAR,
    }
}

fn dist(a: Point, b: Point) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}
