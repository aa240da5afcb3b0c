//! Pluggable face detection capability.
//!
//! The pipeline never looks at pixels to find or describe faces itself; it asks
//! a [`DetectionOracle`]. Implementations wrap a real detector (dlib, ONNX, a
//! sidecar process) or replay recorded results in tests.

use crate::types::{BoundingBox, Encoding, FaceLandmarks};
use rollcall_hw::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("face location failed: {0}")]
    Locate(String),
    #[error("face encoding failed: {0}")]
    Encode(String),
    #[error("landmark extraction failed: {0}")]
    Landmarks(String),
}

pub trait DetectionOracle: Send + Sync {
    /// Find face boxes in `frame`.
    fn locate_faces(&self, frame: &Frame) -> Result<Vec<BoundingBox>, OracleError>;

    /// One encoding per box, in box order. `num_jitters` trades cost for quality.
    fn encode_faces(
        &self,
        frame: &Frame,
        boxes: &[BoundingBox],
        num_jitters: u32,
    ) -> Result<Vec<Encoding>, OracleError>;

    /// One landmark set per box, in box order.
    fn landmarks(
        &self,
        frame: &Frame,
        boxes: &[BoundingBox],
    ) -> Result<Vec<FaceLandmarks>, OracleError>;

    /// Distance from `candidate` to every known encoding, lower = more similar.
    fn distance(&self, known: &[Encoding], candidate: &Encoding) -> Vec<f32> {
        known.iter().map(|k| k.euclidean_distance(candidate)).collect()
    }
}
