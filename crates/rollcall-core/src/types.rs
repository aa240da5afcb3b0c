use chrono::{NaiveDate, NaiveDateTime};
use rollcall_hw::Region;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 2-D landmark point in frame pixel coordinates.
pub type Point = (f32, f32);

/// Face bounding box in the coordinates of the frame it was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Multiply every coordinate by `factor` (e.g. map back to full resolution).
    pub fn scaled(&self, factor: f32) -> BoundingBox {
        BoundingBox {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    pub fn to_region(&self) -> Region {
        Region::from_xywh(self.x, self.y, self.width, self.height)
    }
}

/// Face feature vector produced by the detection oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance. Lower = more similar.
    pub fn euclidean_distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Little-endian f32 byte layout used for storage.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Inverse of [`to_le_bytes`](Self::to_le_bytes). Trailing partial words are ignored.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let values = bytes
            .chunks_exact(4)
            .map(|w| f32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        Self { values }
    }
}

/// Named landmark groups for one face. An empty group means "not detected".
///
/// Eye groups follow the six-point contour convention (outer corner, two upper
/// lid points, inner corner, two lower lid points). Lip groups follow the
/// twelve-point convention where `top_lip[0]` and `top_lip[6]` are the mouth
/// corners, `top_lip[3]` the upper mid-lip, and index 9 of each lip the inner
/// lip midpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceLandmarks {
    pub left_eye: Vec<Point>,
    pub right_eye: Vec<Point>,
    pub left_eyebrow: Vec<Point>,
    pub right_eyebrow: Vec<Point>,
    pub top_lip: Vec<Point>,
    pub bottom_lip: Vec<Point>,
}

/// One face found in a frame. Landmarks are only fetched when needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub encoding: Encoding,
    #[serde(default)]
    pub landmarks: Option<FaceLandmarks>,
}

/// An enrolled person, loaded once per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub display_name: String,
    pub encodings: Vec<Encoding>,
}

/// Coarse mood label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Surprised,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "Neutral",
            Emotion::Happy => "Happy",
            Emotion::Surprised => "Surprised",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neutral" => Ok(Emotion::Neutral),
            "happy" => Ok(Emotion::Happy),
            "surprised" => Ok(Emotion::Surprised),
            other => Err(format!("unknown emotion label: {other}")),
        }
    }
}

/// One day's check-in for one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity_id: i64,
    /// Calendar day in local time.
    pub date: NaiveDate,
    pub timestamp: NaiveDateTime,
    pub emotion: Emotion,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = Encoding::new(vec![0.0, 0.0]);
        let b = Encoding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_encoding_bytes_layout() {
        let enc = Encoding::new(vec![1.5, -2.25, 0.0]);
        let bytes = enc.to_le_bytes();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], &1.5f32.to_le_bytes());
        assert_eq!(Encoding::from_le_bytes(&bytes), enc);
    }

    #[test]
    fn test_emotion_parse_is_case_insensitive() {
        assert_eq!("happy".parse::<Emotion>(), Ok(Emotion::Happy));
        assert_eq!(" Surprised ".parse::<Emotion>(), Ok(Emotion::Surprised));
        assert!("angry".parse::<Emotion>().is_err());
        assert_eq!(Emotion::default().to_string(), "Neutral");
    }

    #[test]
    fn test_bbox_scaled_region() {
        let b = BoundingBox { x: 10.0, y: 5.0, width: 20.0, height: 30.0 };
        let r = b.scaled(4.0).to_region();
        assert_eq!((r.left, r.top, r.right, r.bottom), (40, 20, 120, 140));
    }
}
