//! Landmark-ratio mood heuristic and per-identity majority-vote smoothing.
//!
//! All ratios are normalized by the distance between the eye centres so the
//! rules hold regardless of how far the subject stands from the camera.

use crate::types::{Emotion, FaceLandmarks, Point};
use std::collections::VecDeque;

const SURPRISE_MOUTH_OPEN: f32 = 0.45;
const SURPRISE_EYEBROW: f32 = 0.65;
const HAPPY_WIDE_MOUTH: f32 = 0.95;
const HAPPY_SMILE_MOUTH: f32 = 0.85;
/// Corner lift required for a smile, as a fraction of the eye baseline.
const HAPPY_CORNER_LIFT: f32 = 0.02;

const MIN_LIP_POINTS: usize = 10;

/// Geometric measurements the rules are evaluated on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoodFeatures {
    pub baseline: f32,
    pub mouth_open_ratio: f32,
    pub mouth_width_ratio: f32,
    pub eyebrow_elevation: f32,
    pub corners_lifted: bool,
}

impl MoodFeatures {
    /// `None` when eyes or lips are missing.
    pub fn measure(lm: &FaceLandmarks) -> Option<Self> {
        let left_eye = centroid(&lm.left_eye)?;
        let right_eye = centroid(&lm.right_eye)?;
        let baseline = dist(left_eye, right_eye).max(1.0);

        let (top, bottom) = (&lm.top_lip, &lm.bottom_lip);
        if top.len() < MIN_LIP_POINTS || bottom.len() < MIN_LIP_POINTS {
            return None;
        }

        let mouth_width = dist(top[0], top[6]);
        let mouth_height = dist(top[9], bottom[9]);
        let mouth_open_ratio = if mouth_width > 0.0 {
            mouth_height / mouth_width
        } else {
            0.0
        };

        let eyebrow_elevation = centroid(&lm.left_eyebrow)
            .map(|brow| dist(brow, left_eye) / baseline)
            .unwrap_or(0.0);

        // Image y grows downward: lifted corners sit above (less than) mid-lip.
        let corners_y = (top[0].1 + top[6].1) / 2.0;
        let corners_lifted = corners_y < top[3].1 - baseline * HAPPY_CORNER_LIFT;

        Some(Self {
            baseline,
            mouth_open_ratio,
            mouth_width_ratio: mouth_width / baseline,
            eyebrow_elevation,
            corners_lifted,
        })
    }

    /// First matching rule wins.
    pub fn label(&self) -> Emotion {
        if self.mouth_open_ratio > SURPRISE_MOUTH_OPEN || self.eyebrow_elevation > SURPRISE_EYEBROW {
            Emotion::Surprised
        } else if self.mouth_width_ratio > HAPPY_WIDE_MOUTH
            || (self.mouth_width_ratio > HAPPY_SMILE_MOUTH && self.corners_lifted)
        {
            Emotion::Happy
        } else {
            Emotion::Neutral
        }
    }
}

/// Raw per-frame mood; Neutral whenever the needed landmarks are missing.
pub fn classify(landmarks: &FaceLandmarks) -> Emotion {
    MoodFeatures::measure(landmarks)
        .map(|f| f.label())
        .unwrap_or(Emotion::Neutral)
}

/// Bounded history of raw labels for one identity.
#[derive(Debug, Clone)]
pub struct EmotionHistory {
    capacity: usize,
    labels: VecDeque<Emotion>,
}

impl EmotionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            labels: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a raw label (dropping the oldest when full) and return the
    /// smoothed label.
    pub fn push(&mut self, label: Emotion) -> Emotion {
        if self.labels.len() == self.capacity {
            self.labels.pop_front();
        }
        self.labels.push_back(label);
        self.smoothed()
    }

    /// Most frequent label; ties go to the label seen most recently.
    pub fn smoothed(&self) -> Emotion {
        let mut best = Emotion::Neutral;
        let mut best_count = 0;
        for &label in self.labels.iter().rev() {
            let count = self.labels.iter().filter(|&&l| l == label).count();
            if count > best_count {
                best = label;
                best_count = count;
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

fn centroid(points: &[Point]) -> Option<Point> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
    Some((sx / n, sy / n))
}

fn dist(a: Point, b: Point) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}
