use crate::attendance::AttendanceStore;
use crate::liveness::LivenessConfig;
use crate::stranger::StrangerConfig;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const MIN_TOLERANCE: f32 = 0.30;
pub const MAX_TOLERANCE: f32 = 0.70;
/// Longest accepted pause between processed live frames.
pub const MAX_PROCESSING_INTERVAL_SECONDS: f32 = 3600.0;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("processing interval must be between 0 and 3600 seconds, got {0}")]
    InvalidInterval(f32),
    #[error("{key} must be positive and finite, got {value}")]
    InvalidScale { key: &'static str, value: f32 },
}

/// Tuning for one attendance session.
///
/// Layered lowest to highest: defaults, the `[pipeline]` table of the config
/// file, stored settings, then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum encoding distance for a match, within [0.30, 0.70].
    pub tolerance: f32,
    /// Passed through to the oracle's encoder.
    pub num_jitters: u32,
    pub liveness_enabled: bool,
    pub blink_threshold: f32,
    pub consecutive_frames: u32,
    /// Live sources: minimum time between processed frames.
    pub processing_interval_seconds: f32,
    /// Recorded sources: process every n-th frame.
    pub skip_frames: u32,
    pub stranger_trigger_count: u32,
    pub stranger_cooldown: u32,
    pub emotion_history_size: usize,
    pub live_downscale: f32,
    pub file_downscale: f32,
    /// Stranger spot quantization cell, in processed-frame pixels.
    pub stranger_grid: u32,
    /// Processing cycles a stranger spot may go unseen before eviction.
    pub stranger_evict_after: u64,
    /// Per-subscriber event buffer; lagging subscribers lose the oldest events.
    pub event_capacity: usize,
    /// Consecutive failed reads tolerated on a live device.
    pub live_read_retries: u32,
    pub read_timeout_ms: u64,
    pub clahe_tiles: u32,
    pub clahe_clip: f32,
    /// TrueType font for box labels; empty draws boxes only.
    pub label_font_path: String,
    pub label_font_size: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.45,
            num_jitters: 1,
            liveness_enabled: true,
            blink_threshold: 0.26,
            consecutive_frames: 1,
            processing_interval_seconds: 0.5,
            skip_frames: 5,
            stranger_trigger_count: 3,
            stranger_cooldown: 10,
            emotion_history_size: 3,
            live_downscale: 0.25,
            file_downscale: 0.5,
            stranger_grid: 16,
            stranger_evict_after: 20,
            event_capacity: 64,
            live_read_retries: 3,
            read_timeout_ms: 2000,
            clahe_tiles: 8,
            clahe_clip: 0.02,
            label_font_path: "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".to_string(),
            label_font_size: 16.0,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `ROLLCALL_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    pub fn with_env(self) -> Self {
        self.with_vars(|key| std::env::var(key).ok())
    }

    /// Overlay `ROLLCALL_<FIELD>` values from `lookup`. Unparseable values
    /// are ignored with a warning.
    pub fn with_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(&format!("ROLLCALL_{}", name.to_ascii_uppercase()));

        overlay(&mut self.tolerance, "tolerance", get("tolerance"));
        overlay(&mut self.num_jitters, "num_jitters", get("num_jitters"));
        if let Some(v) = get("liveness_enabled") {
            match parse_bool(&v) {
                Some(b) => self.liveness_enabled = b,
                None => tracing::warn!(value = %v, "ignoring invalid ROLLCALL_LIVENESS_ENABLED"),
            }
        }
        overlay(&mut self.blink_threshold, "blink_threshold", get("blink_threshold"));
        overlay(&mut self.consecutive_frames, "consecutive_frames", get("consecutive_frames"));
        overlay(
            &mut self.processing_interval_seconds,
            "processing_interval_seconds",
            get("processing_interval_seconds"),
        );
        overlay(&mut self.skip_frames, "skip_frames", get("skip_frames"));
        overlay(&mut self.stranger_trigger_count, "stranger_trigger_count", get("stranger_trigger_count"));
        overlay(&mut self.stranger_cooldown, "stranger_cooldown", get("stranger_cooldown"));
        overlay(&mut self.emotion_history_size, "emotion_history_size", get("emotion_history_size"));
        overlay(&mut self.live_downscale, "live_downscale", get("live_downscale"));
        overlay(&mut self.file_downscale, "file_downscale", get("file_downscale"));
        overlay(&mut self.stranger_grid, "stranger_grid", get("stranger_grid"));
        overlay(&mut self.stranger_evict_after, "stranger_evict_after", get("stranger_evict_after"));
        overlay(&mut self.event_capacity, "event_capacity", get("event_capacity"));
        overlay(&mut self.live_read_retries, "live_read_retries", get("live_read_retries"));
        overlay(&mut self.read_timeout_ms, "read_timeout_ms", get("read_timeout_ms"));
        overlay(&mut self.clahe_tiles, "clahe_tiles", get("clahe_tiles"));
        overlay(&mut self.clahe_clip, "clahe_clip", get("clahe_clip"));
        if let Some(v) = get("label_font_path") {
            self.label_font_path = v;
        }
        overlay(&mut self.label_font_size, "label_font_size", get("label_font_size"));
        self
    }

    /// Overlay the administrator-editable settings kept in storage.
    pub fn with_settings(mut self, store: &dyn AttendanceStore) -> Self {
        let read = |key: &str| match store.get_setting(key) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(key, error = %e, "could not read setting");
                None
            }
        };

        overlay(&mut self.tolerance, "tolerance", read("tolerance"));
        overlay(&mut self.num_jitters, "num_jitters", read("num_jitters"));
        if let Some(v) = read("liveness_enabled") {
            match parse_bool(&v) {
                Some(b) => self.liveness_enabled = b,
                None => tracing::warn!(value = %v, "ignoring invalid liveness_enabled setting"),
            }
        }
        self
    }

    /// Clamp out-of-range values into their legal range, rejecting values
    /// that cannot be repaired.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        let interval = self.processing_interval_seconds;
        if !(interval > 0.0 && interval <= MAX_PROCESSING_INTERVAL_SECONDS) {
            return Err(ConfigError::InvalidInterval(self.processing_interval_seconds));
        }
        for (key, value) in [
            ("live_downscale", self.live_downscale),
            ("file_downscale", self.file_downscale),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidScale { key, value });
            }
        }

        let clamped = self.tolerance.clamp(MIN_TOLERANCE, MAX_TOLERANCE);
        if clamped != self.tolerance || self.tolerance.is_nan() {
            tracing::warn!(
                requested = self.tolerance,
                using = clamped,
                "tolerance outside [0.30, 0.70]; clamped"
            );
            self.tolerance = if self.tolerance.is_nan() { 0.45 } else { clamped };
        }

        at_least(&mut self.num_jitters, 1, "num_jitters");
        at_least(&mut self.consecutive_frames, 1, "consecutive_frames");
        at_least(&mut self.skip_frames, 1, "skip_frames");
        at_least(&mut self.emotion_history_size, 1, "emotion_history_size");
        at_least(&mut self.stranger_trigger_count, 1, "stranger_trigger_count");
        at_least(&mut self.stranger_grid, 1, "stranger_grid");
        at_least(&mut self.event_capacity, 1, "event_capacity");
        Ok(self)
    }

    pub fn liveness(&self) -> LivenessConfig {
        LivenessConfig {
            blink_threshold: self.blink_threshold,
            consecutive_frames: self.consecutive_frames,
        }
    }

    pub fn stranger(&self) -> StrangerConfig {
        StrangerConfig {
            trigger_count: self.stranger_trigger_count,
            cooldown: self.stranger_cooldown,
            evict_after: self.stranger_evict_after,
        }
    }

    /// Out-of-range values saturate; `validate()` rejects them first.
    pub fn processing_interval(&self) -> Duration {
        let secs = self.processing_interval_seconds.clamp(0.0, MAX_PROCESSING_INTERVAL_SECONDS);
        Duration::try_from_secs_f32(secs).unwrap_or(Duration::ZERO)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn overlay<T: std::str::FromStr>(slot: &mut T, key: &str, raw: Option<String>) {
    let Some(raw) = raw else { return };
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable config value"),
    }
}

fn at_least<T: PartialOrd + Copy + std::fmt::Display>(slot: &mut T, min: T, key: &str) {
    if *slot < min {
        tracing::warn!(key, requested = %slot, using = %min, "value below minimum; raised");
        *slot = min;
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
