//! Per-session decision state and the per-frame processing cycle.
//!
//! A [`Session`] owns every piece of mutable per-identity and per-spot state.
//! It is driven one frame at a time by the engine worker and never shared.

use crate::attendance::{greeting, AttendanceRecorder, AttendanceStore, RecordOutcome};
use crate::config::PipelineConfig;
use crate::emotion::{self, EmotionHistory};
use crate::events::{identity_label, AnnotationKind, FaceAnnotation, SessionEvent};
use crate::liveness::{face_ear, LivenessTracker, OPEN_EAR};
use crate::matcher::{FaceMatcher, Gallery, Matcher};
use crate::notify::NotificationSink;
use crate::oracle::DetectionOracle;
use crate::stranger::{SpotKey, StrangerTracker};
use crate::types::{BoundingBox, Emotion, FaceLandmarks, Identity};
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_hw::{Frame, LabelFont, Progress, SourceKind};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

const BOX_THICKNESS: u32 = 2;

/// Session-scoped state for one matched identity.
#[derive(Debug)]
struct IdentitySession {
    liveness: LivenessTracker,
    emotions: EmotionHistory,
    greeted: bool,
    /// Local date for which attendance is known to exist.
    settled_on: Option<NaiveDate>,
    seen: bool,
}

/// Collaborators a session talks to.
#[derive(Clone)]
pub struct SessionContext {
    pub oracle: Arc<dyn DetectionOracle>,
    pub store: Arc<dyn AttendanceStore>,
    pub notifier: Arc<dyn NotificationSink>,
}

pub struct Session {
    config: PipelineConfig,
    kind: SourceKind,
    ctx: SessionContext,
    recorder: AttendanceRecorder,
    roster: Vec<Identity>,
    gallery: Gallery,
    identities: HashMap<i64, IdentitySession>,
    strangers: StrangerTracker,
    label_font: Option<LabelFont>,
    frames_read: u64,
    last_processed: Option<Instant>,
    last_percent: Option<u32>,
}

impl Session {
    /// `config` is expected to be validated already.
    pub fn new(config: PipelineConfig, kind: SourceKind, roster: Vec<Identity>, ctx: SessionContext) -> Self {
        let gallery = Gallery::from_identities(&roster);
        if gallery.is_empty() {
            tracing::warn!("roster is empty; every face will be treated as a stranger");
        }
        Self {
            strangers: StrangerTracker::new(config.stranger()),
            label_font: load_label_font(&config),
            recorder: AttendanceRecorder::new(ctx.store.clone()),
            config,
            kind,
            ctx,
            roster,
            gallery,
            identities: HashMap::new(),
            frames_read: 0,
            last_processed: None,
            last_percent: None,
        }
    }

    /// Run one cycle for `frame`. `wall` is the local time used for
    /// attendance dates and stranger timestamps.
    pub fn handle_frame(
        &mut self,
        mut frame: Frame,
        progress: Option<Progress>,
        wall: NaiveDateTime,
    ) -> Vec<SessionEvent> {
        self.frames_read += 1;
        let mut events = Vec::new();

        if let Some(p) = progress {
            let percent = if p.total == 0 {
                0
            } else {
                (p.position.min(p.total) * 100 / p.total) as u32
            };
            if self.last_percent != Some(percent) {
                self.last_percent = Some(percent);
                events.push(SessionEvent::ProgressUpdate {
                    fraction: p.fraction(),
                    position_ms: p.position_ms,
                });
            }
        }

        let annotations = if self.should_process(&frame) {
            let annotations = self.process(&frame, progress, wall, &mut events);
            for a in &annotations {
                let region = a.bbox.to_region();
                frame.draw_rect(region, a.kind.color(), BOX_THICKNESS);
                if let Some(font) = &self.label_font {
                    frame.draw_label(region, &a.label, a.kind.color(), font);
                }
            }
            annotations
        } else {
            Vec::new()
        };

        events.push(SessionEvent::FrameReady {
            frame: Arc::new(frame),
            annotations,
        });
        events
    }

    fn should_process(&mut self, frame: &Frame) -> bool {
        match self.kind {
            SourceKind::File => (self.frames_read - 1) % u64::from(self.config.skip_frames.max(1)) == 0,
            SourceKind::Live => {
                let due = match self.last_processed {
                    None => true,
                    Some(last) => {
                        frame.timestamp.saturating_duration_since(last) >= self.config.processing_interval()
                    }
                };
                if due {
                    self.last_processed = Some(frame.timestamp);
                }
                due
            }
        }
    }

    fn downscale_factor(&self) -> f32 {
        match self.kind {
            SourceKind::Live => self.config.live_downscale,
            SourceKind::File => self.config.file_downscale,
        }
    }

    /// Detect, match and update state for every face. Returns annotations in
    /// full-resolution coordinates.
    fn process(
        &mut self,
        full: &Frame,
        progress: Option<Progress>,
        wall: NaiveDateTime,
        events: &mut Vec<SessionEvent>,
    ) -> Vec<FaceAnnotation> {
        let factor = self.downscale_factor();
        let mut small = full.downscale(factor);
        small.normalize_lighting(self.config.clahe_tiles, self.config.clahe_clip);
        // downscale() copies unchanged for factors >= 1
        let to_full = if small.width == full.width { 1.0 } else { 1.0 / factor };

        let boxes = match self.ctx.oracle.locate_faces(&small) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "face location failed; skipping frame");
                events.push(SessionEvent::Warning(e.to_string()));
                return Vec::new();
            }
        };
        self.strangers.begin_cycle();
        if boxes.is_empty() {
            return Vec::new();
        }

        let encodings = match self.ctx.oracle.encode_faces(&small, &boxes, self.config.num_jitters) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, faces = boxes.len(), "face encoding failed; skipping frame");
                events.push(SessionEvent::Warning(e.to_string()));
                return Vec::new();
            }
        };
        tracing::debug!(
            frame = full.sequence,
            faces = boxes.len(),
            encodings = encodings.len(),
            "faces located"
        );

        let mut annotations = Vec::with_capacity(boxes.len());
        for (bbox, encoding) in boxes.iter().zip(encodings.iter()) {
            let result = FaceMatcher::new(self.ctx.oracle.as_ref()).compare(
                encoding,
                &self.gallery,
                self.config.tolerance,
            );
            let full_box = bbox.scaled(to_full);

            let annotation = match result.identity_index {
                Some(idx) if result.matched => {
                    self.handle_identity(idx, &small, bbox, full_box, progress, wall, events)
                }
                _ => self.handle_stranger(full, bbox, full_box, wall, events),
            };
            annotations.push(annotation);
        }
        annotations
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_identity(
        &mut self,
        idx: usize,
        small: &Frame,
        bbox: &BoundingBox,
        full_box: BoundingBox,
        progress: Option<Progress>,
        wall: NaiveDateTime,
        events: &mut Vec<SessionEvent>,
    ) -> FaceAnnotation {
        let (identity_id, name) = {
            let identity = &self.roster[idx];
            (identity.id, identity.display_name.clone())
        };

        let config = &self.config;
        let state = self.identities.entry(identity_id).or_insert_with(|| {
            let mut liveness = LivenessTracker::new(config.liveness());
            if !config.liveness_enabled {
                liveness.verify();
            }
            IdentitySession {
                liveness,
                emotions: EmotionHistory::new(config.emotion_history_size),
                greeted: false,
                settled_on: None,
                seen: false,
            }
        });

        if !state.seen {
            state.seen = true;
            tracing::info!(identity_id, name = %name, "identity first seen this session");
            if let Some(p) = progress {
                events.push(SessionEvent::IdentitySeen {
                    identity_id,
                    display_name: name.clone(),
                    offset_ms: p.position_ms,
                });
            }
        }

        // One landmark request per face per cycle, shared by liveness and mood.
        let landmarks = fetch_landmarks(self.ctx.oracle.as_ref(), small, bbox);

        if !state.liveness.is_verified() {
            let ear = landmarks.as_ref().map(face_ear).unwrap_or(OPEN_EAR);
            if state.liveness.observe(ear) {
                tracing::info!(identity_id, name = %name, "liveness verified");
            }
        }

        let raw = landmarks
            .as_ref()
            .map(emotion::classify)
            .unwrap_or(Emotion::Neutral);
        let mood = state.emotions.push(raw);
        let verified = state.liveness.is_verified();

        let today = wall.date();
        if verified && state.settled_on != Some(today) {
            match self.recorder.record(identity_id, mood, wall) {
                Ok(outcome) => {
                    state.settled_on = Some(today);
                    if let RecordOutcome::Recorded(record) = &outcome {
                        events.push(SessionEvent::AttendanceLogged {
                            record: record.clone(),
                            display_name: name.clone(),
                        });
                    }
                    if !state.greeted {
                        state.greeted = true;
                        let text = greeting(&name, &outcome);
                        self.ctx.notifier.say(&text);
                        events.push(SessionEvent::Notification(text));
                    }
                }
                Err(e) => {
                    tracing::warn!(identity_id, error = %e, "attendance write failed");
                    events.push(SessionEvent::Warning(format!(
                        "could not record attendance for {name}: {e}"
                    )));
                }
            }
        }

        FaceAnnotation {
            bbox: full_box,
            label: identity_label(&name, mood, verified),
            kind: if verified {
                AnnotationKind::Verified
            } else {
                AnnotationKind::AwaitingBlink
            },
        }
    }

    fn handle_stranger(
        &mut self,
        full: &Frame,
        bbox: &BoundingBox,
        full_box: BoundingBox,
        wall: NaiveDateTime,
        events: &mut Vec<SessionEvent>,
    ) -> FaceAnnotation {
        let key = SpotKey::from_bbox(bbox, self.config.stranger_grid);
        if self.strangers.observe(key) {
            match full.crop(full_box.to_region()) {
                Some(crop) => match self.ctx.store.log_stranger(&crop, wall) {
                    Ok(stranger_id) => {
                        self.strangers.logged(key);
                        tracing::info!(stranger_id, col = key.col, row = key.row, "stranger logged");
                        events.push(SessionEvent::StrangerLogged { stranger_id });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stranger log failed");
                        events.push(SessionEvent::Warning(format!("could not log stranger: {e}")));
                    }
                },
                None => tracing::warn!(?full_box, "stranger box outside frame; will retry"),
            }
        }

        FaceAnnotation {
            bbox: full_box,
            label: "Stranger".to_string(),
            kind: AnnotationKind::Stranger,
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Identities matched at least once this session.
    pub fn identities_seen(&self) -> usize {
        self.identities.len()
    }
}

fn load_label_font(config: &PipelineConfig) -> Option<LabelFont> {
    let path = config.label_font_path.trim();
    if path.is_empty() {
        return None;
    }
    match LabelFont::load(Path::new(path), config.label_font_size) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(path, error = %e, "label font unavailable; drawing boxes without labels");
            None
        }
    }
}

fn fetch_landmarks(oracle: &dyn DetectionOracle, frame: &Frame, bbox: &BoundingBox) -> Option<FaceLandmarks> {
    match oracle.landmarks(frame, std::slice::from_ref(bbox)) {
        Ok(mut sets) if !sets.is_empty() => Some(sets.swap_remove(0)),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "landmarks unavailable; using neutral defaults");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::StoreError;
    use crate::oracle::OracleError;
    use crate::types::{AttendanceRecord, Encoding};
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Every frame shows the same faces.
    struct FixedOracle {
        faces: Vec<(BoundingBox, Encoding)>,
        landmark_calls: Mutex<usize>,
    }

    impl DetectionOracle for FixedOracle {
        fn locate_faces(&self, _: &Frame) -> Result<Vec<BoundingBox>, OracleError> {
            Ok(self.faces.iter().map(|f| f.0).collect())
        }
        fn encode_faces(&self, _: &Frame, boxes: &[BoundingBox], _: u32) -> Result<Vec<Encoding>, OracleError> {
            Ok(self.faces.iter().take(boxes.len()).map(|f| f.1.clone()).collect())
        }
        fn landmarks(&self, _: &Frame, _: &[BoundingBox]) -> Result<Vec<FaceLandmarks>, OracleError> {
            *self.landmark_calls.lock() += 1;
            Err(OracleError::Landmarks("none".into()))
        }
    }

    #[derive(Default)]
    struct Store {
        records: Mutex<Vec<AttendanceRecord>>,
        strangers: Mutex<Vec<(u32, u32)>>,
        fail_writes: bool,
        /// Stranger writes that fail before the store recovers.
        stranger_failures: Mutex<u32>,
    }

    impl AttendanceStore for Store {
        fn enrolled_identities(&self) -> Result<Vec<Identity>, StoreError> {
            Ok(vec![])
        }
        fn has_attendance(&self, id: i64, date: NaiveDate) -> Result<bool, StoreError> {
            Ok(self.records.lock().iter().any(|r| r.identity_id == id && r.date == date))
        }
        fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
            if self.fail_writes {
                return Err(StoreError::Database("disk full".into()));
            }
            self.records.lock().push(record.clone());
            Ok(())
        }
        fn log_stranger(&self, crop: &Frame, _: NaiveDateTime) -> Result<i64, StoreError> {
            let mut failures = self.stranger_failures.lock();
            if self.fail_writes || *failures > 0 {
                *failures = failures.saturating_sub(1);
                return Err(StoreError::Database("disk full".into()));
            }
            let mut s = self.strangers.lock();
            s.push((crop.width, crop.height));
            Ok(s.len() as i64)
        }
        fn get_setting(&self, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl NotificationSink for Collect {
        fn say(&self, text: &str) {
            self.0.lock().push(text.to_string());
        }
    }

    fn bbox(x: f32) -> BoundingBox {
        BoundingBox { x, y: 10.0, width: 20.0, height: 20.0 }
    }

    fn wall() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 5, 4)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn alice() -> Identity {
        Identity {
            id: 1,
            display_name: "Alice".into(),
            encodings: vec![Encoding::new(vec![0.0, 0.0])],
        }
    }

    struct Harness {
        session: Session,
        store: Arc<Store>,
        oracle: Arc<FixedOracle>,
        spoken: Arc<Collect>,
    }

    fn harness(config: PipelineConfig, kind: SourceKind, faces: Vec<(BoundingBox, Encoding)>, store: Store) -> Harness {
        let store = Arc::new(store);
        let oracle = Arc::new(FixedOracle {
            faces,
            landmark_calls: Mutex::new(0),
        });
        let spoken = Arc::new(Collect::default());
        let ctx = SessionContext {
            oracle: oracle.clone(),
            store: store.clone(),
            notifier: spoken.clone(),
        };
        Harness {
            session: Session::new(config, kind, vec![alice()], ctx),
            store,
            oracle,
            spoken,
        }
    }

    fn no_liveness() -> PipelineConfig {
        PipelineConfig {
            liveness_enabled: false,
            skip_frames: 1,
            ..Default::default()
        }
    }

    fn frame(seq: u32) -> Frame {
        Frame::filled(200, 100, [90, 90, 90], seq)
    }

    #[test]
    fn test_liveness_disabled_records_on_first_match() {
        let mut h = harness(
            no_liveness(),
            SourceKind::File,
            vec![(bbox(10.0), Encoding::new(vec![0.1, 0.0]))],
            Store::default(),
        );
        let events = h.session.handle_frame(frame(1), None, wall());
        assert!(events.iter().any(|e| matches!(e, SessionEvent::AttendanceLogged { .. })));
        assert_eq!(h.store.records.lock().len(), 1);
        assert_eq!(h.spoken.0.lock().len(), 1);

        // Same identity again: no second write, no second greeting
        h.session.handle_frame(frame(2), None, wall());
        assert_eq!(h.store.records.lock().len(), 1);
        assert_eq!(h.spoken.0.lock().len(), 1);
    }

    #[test]
    fn test_missing_landmarks_never_verify() {
        let mut h = harness(
            PipelineConfig {
                skip_frames: 1,
                ..Default::default()
            },
            SourceKind::File,
            vec![(bbox(10.0), Encoding::new(vec![0.1, 0.0]))],
            Store::default(),
        );
        for seq in 1..=5 {
            let events = h.session.handle_frame(frame(seq), None, wall());
            let Some(SessionEvent::FrameReady { annotations, .. }) = events.last() else {
                panic!("frame not published");
            };
            assert_eq!(annotations[0].kind, AnnotationKind::AwaitingBlink);
        }
        assert!(h.store.records.lock().is_empty());
        assert_eq!(*h.oracle.landmark_calls.lock(), 5);
    }

    #[test]
    fn test_stranger_logged_once_with_full_resolution_crop() {
        let mut h = harness(
            no_liveness(),
            SourceKind::File,
            vec![(bbox(40.0), Encoding::new(vec![5.0, 5.0]))],
            Store::default(),
        );
        let logged: usize = (1..=6)
            .map(|seq| {
                h.session
                    .handle_frame(frame(seq), None, wall())
                    .iter()
                    .filter(|e| matches!(e, SessionEvent::StrangerLogged { .. }))
                    .count()
            })
            .sum();
        assert_eq!(logged, 1);
        // 20 px box at file downscale 0.5 is 40 px at full resolution
        assert_eq!(*h.store.strangers.lock(), vec![(40, 40)]);
        assert!(h.store.records.lock().is_empty());
    }

    #[test]
    fn test_failed_stranger_write_retries_next_cycle() {
        let mut h = harness(
            no_liveness(),
            SourceKind::File,
            vec![(bbox(40.0), Encoding::new(vec![5.0, 5.0]))],
            Store {
                stranger_failures: Mutex::new(1),
                ..Default::default()
            },
        );
        let mut kinds = Vec::new();
        for seq in 1..=6 {
            for e in h.session.handle_frame(frame(seq), None, wall()) {
                match e {
                    SessionEvent::StrangerLogged { .. } => kinds.push("logged"),
                    SessionEvent::Warning(_) => kinds.push("warning"),
                    _ => {}
                }
            }
        }
        // Third sighting fails, fourth is stored, then the spot cools down
        assert_eq!(kinds, vec!["warning", "logged"]);
        assert_eq!(h.store.strangers.lock().len(), 1);
    }

    fn drawn_frame(config: PipelineConfig) -> Arc<Frame> {
        let mut h = harness(
            config,
            SourceKind::File,
            vec![(bbox(40.0), Encoding::new(vec![5.0, 5.0]))],
            Store::default(),
        );
        let events = h.session.handle_frame(frame(1), None, wall());
        match events.last() {
            Some(SessionEvent::FrameReady { frame, .. }) => frame.clone(),
            _ => panic!("frame not published"),
        }
    }

    #[test]
    fn test_labels_drawn_when_font_loads() {
        let unlabeled = drawn_frame(PipelineConfig {
            label_font_path: String::new(),
            ..no_liveness()
        });
        let missing = drawn_frame(PipelineConfig {
            label_font_path: "/nonexistent/label.ttf".into(),
            ..no_liveness()
        });
        // A missing font still draws the box
        assert_eq!(missing.data, unlabeled.data);
        assert_ne!(unlabeled.data, frame(1).data);

        if !Path::new(&PipelineConfig::default().label_font_path).exists() {
            return;
        }
        let labeled = drawn_frame(no_liveness());
        assert_ne!(labeled.data, unlabeled.data, "label text must be drawn");
    }

    #[test]
    fn test_storage_failure_becomes_warning() {
        let mut h = harness(
            no_liveness(),
            SourceKind::File,
            vec![(bbox(10.0), Encoding::new(vec![0.0, 0.0]))],
            Store {
                fail_writes: true,
                ..Default::default()
            },
        );
        let events = h.session.handle_frame(frame(1), None, wall());
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Warning(_))));
        assert!(h.spoken.0.lock().is_empty());
    }

    #[test]
    fn test_file_source_processes_every_nth_frame() {
        let mut h = harness(
            PipelineConfig {
                skip_frames: 3,
                ..no_liveness()
            },
            SourceKind::File,
            vec![],
            Store::default(),
        );
        for seq in 1..=7 {
            h.session.handle_frame(frame(seq), None, wall());
        }
        // Frames 1, 4 and 7
        assert_eq!(h.session.frames_read(), 7);
        assert_eq!(h.session.strangers.cycle_count(), 3);
    }

    #[test]
    fn test_live_source_is_time_throttled() {
        let mut h = harness(no_liveness(), SourceKind::Live, vec![], Store::default());
        let start = Instant::now();
        for offset_ms in [0u64, 100, 200, 600, 700, 1200] {
            let mut f = frame(1);
            f.timestamp = start + Duration::from_millis(offset_ms);
            h.session.handle_frame(f, None, wall());
        }
        // Processed at 0, 600 and 1200 ms
        assert_eq!(h.session.strangers.cycle_count(), 3);
    }

    #[test]
    fn test_progress_reported_on_percent_change() {
        let mut h = harness(no_liveness(), SourceKind::File, vec![], Store::default());
        let mut updates = 0;
        for position in 1..=400u64 {
            let p = Progress {
                position,
                total: 400,
                position_ms: position * 40,
            };
            updates += h
                .session
                .handle_frame(frame(position as u32), Some(p), wall())
                .iter()
                .filter(|e| matches!(e, SessionEvent::ProgressUpdate { .. }))
                .count();
        }
        // 0% through 100%
        assert_eq!(updates, 101);
    }

    #[test]
    fn test_identity_seen_reports_offset_once() {
        let mut h = harness(
            no_liveness(),
            SourceKind::File,
            vec![(bbox(10.0), Encoding::new(vec![0.0, 0.0]))],
            Store::default(),
        );
        let mut offsets = Vec::new();
        for position in 1..=3u64 {
            let p = Progress {
                position,
                total: 10,
                position_ms: position * 100,
            };
            for e in h.session.handle_frame(frame(position as u32), Some(p), wall()) {
                if let SessionEvent::IdentitySeen { offset_ms, .. } = e {
                    offsets.push(offset_ms);
                }
            }
        }
        assert_eq!(offsets, vec![100]);
    }
}
