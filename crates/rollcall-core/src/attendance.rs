//! At-most-once-per-day attendance recording against a pluggable store.

use crate::types::{AttendanceRecord, Emotion, Identity};
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_hw::Frame;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Database(String),
    #[error("attendance already recorded for identity {identity_id} on {date}")]
    Duplicate { identity_id: i64, date: NaiveDate },
    #[error("stranger image could not be saved: {0}")]
    Image(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Roster and attendance persistence as seen by the pipeline.
///
/// Reads happen on the caller's thread at session start; writes
/// (`insert_attendance`, `log_stranger`) come from the session worker.
pub trait AttendanceStore: Send + Sync {
    /// Active identities with at least one encoding.
    fn enrolled_identities(&self) -> Result<Vec<Identity>, StoreError>;

    fn has_attendance(&self, identity_id: i64, date: NaiveDate) -> Result<bool, StoreError>;

    /// Must fail with [`StoreError::Duplicate`] if `(identity_id, date)` exists.
    fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError>;

    /// Persist a face crop; returns the stranger log id.
    fn log_stranger(&self, crop: &Frame, seen_at: NaiveDateTime) -> Result<i64, StoreError>;

    fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// `get_setting` falling back to `default` when unset or unreadable.
    fn setting_or(&self, key: &str, default: &str) -> String {
        match self.get_setting(key) {
            Ok(Some(v)) => v,
            Ok(None) => default.to_string(),
            Err(e) => {
                tracing::warn!(key, error = %e, "setting unreadable; using default");
                default.to_string()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Recorded(AttendanceRecord),
    AlreadyRegistered,
}

pub struct AttendanceRecorder {
    store: Arc<dyn AttendanceStore>,
}

impl AttendanceRecorder {
    pub fn new(store: Arc<dyn AttendanceStore>) -> Self {
        Self { store }
    }

    /// Record `identity_id` for the local date of `now` unless already present.
    ///
    /// A duplicate rejected by the store (another writer got there first)
    /// is reported as `AlreadyRegistered`, not as an error.
    pub fn record(
        &self,
        identity_id: i64,
        emotion: Emotion,
        now: NaiveDateTime,
    ) -> Result<RecordOutcome, StoreError> {
        let date = now.date();
        if self.store.has_attendance(identity_id, date)? {
            tracing::debug!(identity_id, %date, "attendance already present");
            return Ok(RecordOutcome::AlreadyRegistered);
        }

        let record = AttendanceRecord {
            identity_id,
            date,
            timestamp: now,
            emotion,
        };
        match self.store.insert_attendance(&record) {
            Ok(()) => {
                tracing::info!(identity_id, %date, %emotion, "attendance recorded");
                Ok(RecordOutcome::Recorded(record))
            }
            Err(StoreError::Duplicate { .. }) => Ok(RecordOutcome::AlreadyRegistered),
            Err(e) => Err(e),
        }
    }
}

/// Spoken greeting for the first outcome of an identity in a session.
pub fn greeting(display_name: &str, outcome: &RecordOutcome) -> String {
    match outcome {
        RecordOutcome::Recorded(record) => {
            let mut text = format!("Hello {display_name}, your attendance has been recorded. ");
            if record.emotion == Emotion::Happy {
                text.push_str("You look happy today!");
            }
            text.trim_end().to_string()
        }
        RecordOutcome::AlreadyRegistered => {
            format!("Hello {display_name}, you have already registered your attendance today")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<AttendanceRecord>>,
        /// Simulates a concurrent writer: `has_attendance` says no, insert says duplicate.
        racing: bool,
    }

    impl AttendanceStore for MemoryStore {
        fn enrolled_identities(&self) -> Result<Vec<Identity>, StoreError> {
            Ok(vec![])
        }
        fn has_attendance(&self, identity_id: i64, date: NaiveDate) -> Result<bool, StoreError> {
            if self.racing {
                return Ok(false);
            }
            let records = self.records.lock().unwrap();
            Ok(records.iter().any(|r| r.identity_id == identity_id && r.date == date))
        }
        fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
            if self.racing {
                return Err(StoreError::Duplicate {
                    identity_id: record.identity_id,
                    date: record.date,
                });
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
        fn log_stranger(&self, _: &Frame, _: NaiveDateTime) -> Result<i64, StoreError> {
            Ok(1)
        }
        fn get_setting(&self, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
    }

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_one_record_per_identity_per_day() {
        let store = Arc::new(MemoryStore::default());
        let recorder = AttendanceRecorder::new(store.clone());

        let first = recorder.record(7, Emotion::Happy, at(2, 9)).unwrap();
        assert!(matches!(first, RecordOutcome::Recorded(ref r) if r.emotion == Emotion::Happy));
        assert_eq!(
            recorder.record(7, Emotion::Neutral, at(2, 17)).unwrap(),
            RecordOutcome::AlreadyRegistered
        );
        assert!(matches!(
            recorder.record(7, Emotion::Neutral, at(3, 9)).unwrap(),
            RecordOutcome::Recorded(_)
        ));
        assert!(matches!(
            recorder.record(8, Emotion::Neutral, at(3, 9)).unwrap(),
            RecordOutcome::Recorded(_)
        ));
        assert_eq!(store.records.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_duplicate_on_insert_is_already_registered() {
        let store = Arc::new(MemoryStore {
            racing: true,
            ..Default::default()
        });
        let recorder = AttendanceRecorder::new(store);
        assert_eq!(
            recorder.record(1, Emotion::Neutral, at(2, 9)).unwrap(),
            RecordOutcome::AlreadyRegistered
        );
    }

    #[test]
    fn test_greeting_text() {
        let happy = RecordOutcome::Recorded(AttendanceRecord {
            identity_id: 1,
            date: at(2, 9).date(),
            timestamp: at(2, 9),
            emotion: Emotion::Happy,
        });
        assert_eq!(
            greeting("Alice", &happy),
            "Hello Alice, your attendance has been recorded. You look happy today!"
        );

        let plain = RecordOutcome::Recorded(AttendanceRecord {
            emotion: Emotion::Neutral,
            ..match happy {
                RecordOutcome::Recorded(r) => r,
                RecordOutcome::AlreadyRegistered => unreachable!(),
            }
        });
        assert_eq!(
            greeting("Alice", &plain),
            "Hello Alice, your attendance has been recorded."
        );
        assert_eq!(
            greeting("Bob", &RecordOutcome::AlreadyRegistered),
            "Hello Bob, you have already registered your attendance today"
        );
    }

    #[test]
    fn test_setting_or_default() {
        let store = MemoryStore::default();
        assert_eq!(store.setting_or("tolerance", "0.45"), "0.45");
    }
}
