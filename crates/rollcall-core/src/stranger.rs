//! Duplicate suppression for unmatched faces.
//!
//! A face that matches nobody is only worth logging once it has been seen in
//! roughly the same spot for a few processing cycles; afterwards that spot is
//! ignored for a cooldown so one visitor standing still is logged once.

use crate::types::BoundingBox;
use std::collections::HashMap;

/// Quantized top-left corner of a face box, in processed-frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpotKey {
    pub col: i32,
    pub row: i32,
}

impl SpotKey {
    pub fn from_bbox(bbox: &BoundingBox, grid: u32) -> Self {
        let grid = grid.max(1) as f32;
        Self {
            col: (bbox.x / grid).floor() as i32,
            row: (bbox.y / grid).floor() as i32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotState {
    /// Consecutive detections so far.
    Tracking(u32),
    /// Detections still to be ignored before tracking resumes.
    Cooldown(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrangerConfig {
    pub trigger_count: u32,
    pub cooldown: u32,
    /// Cycles a key may go unseen before it is forgotten.
    pub evict_after: u64,
}

impl Default for StrangerConfig {
    fn default() -> Self {
        Self {
            trigger_count: 3,
            cooldown: 10,
            evict_after: 20,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Spot {
    state: SpotState,
    last_seen: u64,
}

#[derive(Debug)]
pub struct StrangerTracker {
    config: StrangerConfig,
    cycle: u64,
    spots: HashMap<SpotKey, Spot>,
}

impl StrangerTracker {
    pub fn new(config: StrangerConfig) -> Self {
        Self {
            config,
            cycle: 0,
            spots: HashMap::new(),
        }
    }

    /// Start a processing cycle and drop keys that have gone stale.
    pub fn begin_cycle(&mut self) {
        self.cycle += 1;
        let (now, limit) = (self.cycle, self.config.evict_after);
        let before = self.spots.len();
        self.spots.retain(|_, s| now - s.last_seen <= limit);
        let evicted = before - self.spots.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.spots.len(), "evicted stale stranger spots");
        }
    }

    /// Record one unmatched detection at `key`. Returns `true` when the face
    /// should be logged now. The spot keeps firing on every detection until
    /// [`logged`](Self::logged) confirms the sighting was stored.
    pub fn observe(&mut self, key: SpotKey) -> bool {
        let trigger = self.config.trigger_count.max(1);
        let spot = self.spots.entry(key).or_insert(Spot {
            state: SpotState::Tracking(0),
            last_seen: self.cycle,
        });
        spot.last_seen = self.cycle;

        let (next, fire) = match spot.state {
            SpotState::Tracking(n) => {
                let n = (n + 1).min(trigger);
                (SpotState::Tracking(n), n >= trigger)
            }
            SpotState::Cooldown(n) => (cooldown(n.saturating_sub(1)), false),
        };
        spot.state = next;
        fire
    }

    /// The sighting at `key` was stored; ignore the spot for the cooldown.
    pub fn logged(&mut self, key: SpotKey) {
        let state = cooldown(self.config.cooldown);
        if let Some(spot) = self.spots.get_mut(&key) {
            spot.state = state;
        }
    }

    /// Processing cycles started so far.
    pub fn cycle_count(&self) -> u64 {
        self.cycle
    }

    pub fn state(&self, key: &SpotKey) -> Option<SpotState> {
        self.spots.get(key).map(|s| s.state)
    }

    pub fn len(&self) -> usize {
        self.spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }
}

/// An exhausted cooldown goes straight back to tracking.
fn cooldown(remaining: u32) -> SpotState {
    match remaining {
        0 => SpotState::Tracking(0),
        n => SpotState::Cooldown(n),
    }
}
