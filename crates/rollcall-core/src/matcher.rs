//! Candidate-vs-roster identity matching.

use crate::oracle::DetectionOracle;
use crate::types::{Encoding, Identity};

/// Flattened view of the roster: every enrolled encoding tagged with the
/// index of the identity it belongs to.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    encodings: Vec<Encoding>,
    owners: Vec<usize>,
}

impl Gallery {
    pub fn from_identities(identities: &[Identity]) -> Self {
        let mut gallery = Gallery::default();
        for (idx, identity) in identities.iter().enumerate() {
            for enc in &identity.encodings {
                gallery.encodings.push(enc.clone());
                gallery.owners.push(idx);
            }
        }
        gallery
    }

    pub fn len(&self) -> usize {
        self.encodings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encodings.is_empty()
    }
}

/// Result of matching a candidate encoding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Index into the identity list the gallery was built from.
    pub identity_index: Option<usize>,
    /// Distance to the closest gallery entry (infinite for an empty gallery).
    pub distance: f32,
}

impl MatchResult {
    fn none(distance: f32) -> Self {
        Self {
            matched: false,
            identity_index: None,
            distance,
        }
    }
}

/// Strategy for comparing a candidate encoding against the enrolled gallery.
pub trait Matcher {
    fn compare(&self, candidate: &Encoding, gallery: &Gallery, tolerance: f32) -> MatchResult;
}

/// Nearest-neighbour matcher using the oracle's distance function.
///
/// Only the argmin entry is considered; if that closest entry is still
/// farther than `tolerance` the candidate is a non-match even when some other
/// entry would individually pass.
pub struct FaceMatcher<'a> {
    oracle: &'a dyn DetectionOracle,
}

impl<'a> FaceMatcher<'a> {
    pub fn new(oracle: &'a dyn DetectionOracle) -> Self {
        Self { oracle }
    }
}

impl Matcher for FaceMatcher<'_> {
    fn compare(&self, candidate: &Encoding, gallery: &Gallery, tolerance: f32) -> MatchResult {
        if gallery.is_empty() {
            return MatchResult::none(f32::INFINITY);
        }

        let distances = self.oracle.distance(&gallery.encodings, candidate);
        let best = distances
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, d)| !d.is_nan())
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match best {
            Some((idx, dist)) if dist <= tolerance && idx < gallery.owners.len() => MatchResult {
                matched: true,
                identity_index: Some(gallery.owners[idx]),
                distance: dist,
            },
            Some((_, dist)) => MatchResult::none(dist),
            None => MatchResult::none(f32::INFINITY),
        }
    }
}
