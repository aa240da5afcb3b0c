//! Detection oracle that replays recorded detector output.
//!
//! Each line of the detections file is a JSON object
//! `{"frame": <sequence>, "faces": [{"bbox": {...}, "encoding": [...], "landmarks": {...}}]}`
//! keyed by the source's frame sequence number. Boxes are in the coordinates
//! of the downscaled frame the pipeline hands to the oracle.

use anyhow::{Context, Result};
use rollcall_core::{BoundingBox, DetectedFace, DetectionOracle, Encoding, FaceLandmarks, OracleError};
use rollcall_hw::Frame;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

const BOX_TOLERANCE: f32 = 0.5;

#[derive(Deserialize)]
struct DetectionLine {
    frame: u32,
    #[serde(default)]
    faces: Vec<DetectedFace>,
}

pub struct ReplayOracle {
    frames: HashMap<u32, Vec<DetectedFace>>,
}

impl ReplayOracle {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening detections {}", path.display()))?;
        let oracle = Self::from_reader(BufReader::new(file))
            .with_context(|| format!("reading detections {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            frames = oracle.frames.len(),
            "detections loaded"
        );
        Ok(oracle)
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut frames: HashMap<u32, Vec<DetectedFace>> = HashMap::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: DetectionLine =
                serde_json::from_str(&line).with_context(|| format!("line {}", n + 1))?;
            frames.entry(parsed.frame).or_default().extend(parsed.faces);
        }
        Ok(Self { frames })
    }

    /// Faces recorded for frame `sequence`.
    pub fn faces_at(&self, sequence: u32) -> &[DetectedFace] {
        self.frames.get(&sequence).map(Vec::as_slice).unwrap_or(&[])
    }

    fn faces(&self, frame: &Frame) -> &[DetectedFace] {
        self.faces_at(frame.sequence)
    }

    fn find(&self, frame: &Frame, bbox: &BoundingBox) -> Option<&DetectedFace> {
        self.faces(frame).iter().find(|f| same_box(&f.bbox, bbox))
    }
}

fn same_box(a: &BoundingBox, b: &BoundingBox) -> bool {
    (a.x - b.x).abs() <= BOX_TOLERANCE
        && (a.y - b.y).abs() <= BOX_TOLERANCE
        && (a.width - b.width).abs() <= BOX_TOLERANCE
        && (a.height - b.height).abs() <= BOX_TOLERANCE
}

impl DetectionOracle for ReplayOracle {
    fn locate_faces(&self, frame: &Frame) -> Result<Vec<BoundingBox>, OracleError> {
        Ok(self.faces(frame).iter().map(|f| f.bbox).collect())
    }

    fn encode_faces(
        &self,
        frame: &Frame,
        boxes: &[BoundingBox],
        _num_jitters: u32,
    ) -> Result<Vec<Encoding>, OracleError> {
        boxes
            .iter()
            .map(|b| {
                self.find(frame, b)
                    .map(|f| f.encoding.clone())
                    .ok_or_else(|| OracleError::Encode(format!("no recorded face at {b:?}")))
            })
            .collect()
    }

    fn landmarks(
        &self,
        frame: &Frame,
        boxes: &[BoundingBox],
    ) -> Result<Vec<FaceLandmarks>, OracleError> {
        boxes
            .iter()
            .map(|b| {
                self.find(frame, b)
                    .and_then(|f| f.landmarks.clone())
                    .ok_or_else(|| OracleError::Landmarks(format!("no recorded landmarks at {b:?}")))
            })
            .collect()
    }
}
