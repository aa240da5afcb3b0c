//! SQLite persistence for the roster, attendance log, stranger log and settings.

use crate::error::{DbError, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use rollcall_core::{AttendanceRecord, AttendanceStore, Emotion, Encoding, Identity, StoreError};
use rollcall_hw::Frame;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::{Path, PathBuf};

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Settings key holding the administrator password hash (argon2 PHC string).
pub const ADMIN_PASSWORD_KEY: &str = "admin_password";
/// Accepted while no administrator password has been set.
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin";

/// Contact details kept alongside an enrolled person.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserDetails {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub details: UserDetails,
    pub is_active: bool,
    pub encodings: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrangerEntry {
    pub id: i64,
    pub image_path: PathBuf,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
    pub count: u32,
}

pub struct Database {
    pub(crate) conn: Mutex<Connection>,
    strangers_dir: PathBuf,
}

impl Database {
    /// Open (creating if needed) the database at `path`. Stranger crops are
    /// written under `strangers_dir`.
    pub fn open(path: impl AsRef<Path>, strangers_dir: impl Into<PathBuf>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;
        tracing::debug!(path = %path.display(), "database opened");
        Self::with_connection(conn, strangers_dir.into())
    }

    pub fn in_memory(strangers_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, strangers_dir.into())
    }

    fn with_connection(conn: Connection, strangers_dir: PathBuf) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
            strangers_dir,
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                phone TEXT,
                email TEXT,
                address TEXT,
                notes TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS encodings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                encoding BLOB NOT NULL,
                image_path TEXT
            );
            CREATE TABLE IF NOT EXISTS strangers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                image_path TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 1
            );
            CREATE TABLE IF NOT EXISTS attendance (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                date TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                emotion TEXT NOT NULL DEFAULT 'Neutral',
                UNIQUE(user_id, date)
            );
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);",
        )?;
        Ok(())
    }

    // ── Roster ──────────────────────────────────────────────────────

    pub fn add_user(&self, details: &UserDetails) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (name, phone, email, address, notes) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                details.name,
                details.phone,
                details.email,
                details.address,
                details.notes
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::info!(user_id = id, name = %details.name, "user added");
        Ok(id)
    }

    pub fn update_user(&self, id: i64, details: &UserDetails) -> Result<()> {
        let changed = self.conn.lock().execute(
            "UPDATE users SET name = ?1, phone = ?2, email = ?3, address = ?4, notes = ?5
             WHERE id = ?6",
            params![
                details.name,
                details.phone,
                details.email,
                details.address,
                details.notes,
                id
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    /// Soft delete: the user and their encodings leave the roster but their
    /// attendance history stays.
    pub fn deactivate_user(&self, id: i64) -> Result<()> {
        let changed = self
            .conn
            .lock()
            .execute("UPDATE users SET is_active = 0 WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("user {id}")));
        }
        tracing::info!(user_id = id, "user deactivated");
        Ok(())
    }

    pub fn add_encoding(&self, user_id: i64, encoding: &Encoding, image_path: Option<&Path>) -> Result<i64> {
        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            params![user_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(DbError::NotFound(format!("user {user_id}")));
        }
        conn.execute(
            "INSERT INTO encodings (user_id, encoding, image_path) VALUES (?1, ?2, ?3)",
            params![
                user_id,
                encoding.to_le_bytes(),
                image_path.map(|p| p.to_string_lossy().into_owned())
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                "SELECT u.id, u.name, u.phone, u.email, u.address, u.notes, u.is_active,
                        (SELECT COUNT(*) FROM encodings e WHERE e.user_id = u.id)
                 FROM users u WHERE u.id = ?1",
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Active users, or every user when `include_inactive` is set.
    pub fn users(&self, include_inactive: bool) -> Result<Vec<User>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT u.id, u.name, u.phone, u.email, u.address, u.notes, u.is_active,
                    (SELECT COUNT(*) FROM encodings e WHERE e.user_id = u.id)
             FROM users u
             WHERE u.is_active = 1 OR ?1
             ORDER BY u.name COLLATE NOCASE, u.id",
        )?;
        let users = stmt
            .query_map(params![include_inactive], user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    /// Active identities with their encodings, in enrollment order.
    pub fn identities(&self) -> Result<Vec<Identity>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT u.id, u.name, e.encoding
             FROM encodings e
             JOIN users u ON e.user_id = u.id
             WHERE u.is_active = 1
             ORDER BY u.id, e.id",
        )?;
        let mut rows = stmt.query([])?;

        let mut identities: Vec<Identity> = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let blob: Vec<u8> = row.get(2)?;
            let encoding = Encoding::from_le_bytes(&blob);
            match identities.last_mut() {
                Some(last) if last.id == id => last.encodings.push(encoding),
                _ => identities.push(Identity {
                    id,
                    display_name: row.get(1)?,
                    encodings: vec![encoding],
                }),
            }
        }
        Ok(identities)
    }

    // ── Attendance ──────────────────────────────────────────────────

    pub fn attendance_exists(&self, user_id: i64, date: NaiveDate) -> Result<bool> {
        let exists = self.conn.lock().query_row(
            "SELECT EXISTS(SELECT 1 FROM attendance WHERE user_id = ?1 AND date = ?2)",
            params![user_id, date.format(DATE_FORMAT).to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Insert one record. The `(user_id, date)` uniqueness constraint makes a
    /// second insert for the same day fail with a UNIQUE violation; an
    /// unknown user fails the foreign key instead.
    pub fn insert_attendance(&self, record: &AttendanceRecord) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO attendance (user_id, date, timestamp, emotion) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.identity_id,
                record.date.format(DATE_FORMAT).to_string(),
                record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                record.emotion.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn delete_attendance(&self, record_id: i64) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .execute("DELETE FROM attendance WHERE id = ?1", params![record_id])?;
        Ok(changed > 0)
    }

    // ── Strangers ───────────────────────────────────────────────────

    /// Write `crop` as a PNG under the strangers directory and log it.
    pub fn save_stranger(&self, crop: &Frame, seen_at: NaiveDateTime) -> Result<i64> {
        let image = crop
            .to_rgb_image()
            .ok_or_else(|| DbError::Corrupt(format!("{}x{} crop with short buffer", crop.width, crop.height)))?;

        std::fs::create_dir_all(&self.strangers_dir)?;
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let filename = format!("stranger_{}_{}.png", seen_at.format("%Y%m%d_%H%M%S"), &suffix[..8]);
        let path = self.strangers_dir.join(filename);
        image.save(&path)?;

        let ts = seen_at.format(TIMESTAMP_FORMAT).to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO strangers (image_path, first_seen, last_seen, count) VALUES (?1, ?2, ?2, 1)",
            params![path.to_string_lossy().into_owned(), ts],
        )?;
        let id = conn.last_insert_rowid();
        tracing::info!(stranger_id = id, path = %path.display(), "stranger image saved");
        Ok(id)
    }

    /// Newest first.
    pub fn strangers(&self) -> Result<Vec<StrangerEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, image_path, first_seen, last_seen, count
             FROM strangers ORDER BY last_seen DESC, id DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u32>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, path, first, last, count)| {
                Ok(StrangerEntry {
                    id,
                    image_path: PathBuf::from(path),
                    first_seen: parse_timestamp(&first)?,
                    last_seen: parse_timestamp(&last)?,
                    count,
                })
            })
            .collect()
    }

    /// Remove the log entry and its image file. A missing file is not an error.
    pub fn delete_stranger(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let path: Option<String> = conn
            .query_row(
                "SELECT image_path FROM strangers WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(path) = path else {
            return Ok(false);
        };

        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path, error = %e, "could not remove stranger image"),
        }
        conn.execute("DELETE FROM strangers WHERE id = ?1", params![id])?;
        Ok(true)
    }

    // ── Settings ────────────────────────────────────────────────────

    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .lock()
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        tracing::info!(key, value, "setting updated");
        Ok(())
    }

    /// Every setting except the administrator password hash.
    pub fn settings(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT key, COALESCE(value, '') FROM settings WHERE key != ?1 ORDER BY key",
        )?;
        let rows = stmt
            .query_map(params![ADMIN_PASSWORD_KEY], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Administrator password ──────────────────────────────────────

    /// Hash `password` with a fresh salt and store it, replacing any previous one.
    pub fn set_admin_password(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(DbError::Password("password must not be empty".into()));
        }
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| DbError::Password(e.to_string()))?
            .to_string();
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![ADMIN_PASSWORD_KEY, hash],
        )?;
        tracing::info!("admin password changed");
        Ok(())
    }

    /// Check `password` against the stored hash. Until a password is set
    /// only [`DEFAULT_ADMIN_PASSWORD`] is accepted.
    pub fn verify_admin_password(&self, password: &str) -> Result<bool> {
        let Some(stored) = self.setting(ADMIN_PASSWORD_KEY)? else {
            tracing::warn!("no admin password set; using the default");
            return Ok(password == DEFAULT_ADMIN_PASSWORD);
        };
        let hash = PasswordHash::new(&stored)
            .map_err(|e| DbError::Corrupt(format!("admin password hash: {e}")))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok())
    }
}

impl AttendanceStore for Database {
    fn enrolled_identities(&self) -> std::result::Result<Vec<Identity>, StoreError> {
        Ok(self.identities()?)
    }

    fn has_attendance(&self, identity_id: i64, date: NaiveDate) -> std::result::Result<bool, StoreError> {
        Ok(self.attendance_exists(identity_id, date)?)
    }

    fn insert_attendance(&self, record: &AttendanceRecord) -> std::result::Result<(), StoreError> {
        match Database::insert_attendance(self, record) {
            Ok(_) => Ok(()),
            Err(DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _)))
                if e.code == ErrorCode::ConstraintViolation
                    && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(StoreError::Duplicate {
                    identity_id: record.identity_id,
                    date: record.date,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn log_stranger(&self, crop: &Frame, seen_at: NaiveDateTime) -> std::result::Result<i64, StoreError> {
        Ok(self.save_stranger(crop, seen_at)?)
    }

    fn get_setting(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        Ok(self.setting(key)?)
    }
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        details: UserDetails {
            name: row.get(1)?,
            phone: row.get(2)?,
            email: row.get(3)?,
            address: row.get(4)?,
            notes: row.get(5)?,
        },
        is_active: row.get(6)?,
        encodings: row.get::<_, i64>(7)? as usize,
    })
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| DbError::Corrupt(format!("date {s:?}: {e}")))
}

pub(crate) fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map_err(|e| DbError::Corrupt(format!("timestamp {s:?}: {e}")))
}

pub(crate) fn parse_emotion(s: &str) -> Result<Emotion> {
    s.parse().map_err(DbError::Corrupt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::AttendanceRecorder;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn db() -> (Database, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory(dir.path().join("strangers")).unwrap();
        (db, dir)
    }

    fn named(name: &str) -> UserDetails {
        UserDetails {
            name: name.into(),
            ..Default::default()
        }
    }

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn record(user: i64, ts: NaiveDateTime, emotion: Emotion) -> AttendanceRecord {
        AttendanceRecord {
            identity_id: user,
            date: ts.date(),
            timestamp: ts,
            emotion,
        }
    }

    #[test]
    fn test_roster_excludes_inactive_users() {
        let (db, _dir) = db();
        let alice = db.add_user(&named("Alice")).unwrap();
        let bob = db.add_user(&named("Bob")).unwrap();
        let carol = db.add_user(&named("Carol")).unwrap();
        db.add_encoding(alice, &Encoding::new(vec![0.1, 0.2]), None).unwrap();
        db.add_encoding(alice, &Encoding::new(vec![0.3, 0.4]), None).unwrap();
        db.add_encoding(bob, &Encoding::new(vec![0.5, 0.6]), None).unwrap();
        let _ = carol; // no encodings: not part of the roster

        let ids = db.identities().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].display_name, "Alice");
        assert_eq!(ids[0].encodings[1], Encoding::new(vec![0.3, 0.4]));

        db.deactivate_user(bob).unwrap();
        let ids = db.identities().unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(db.users(false).unwrap().len(), 2);
        assert_eq!(db.users(true).unwrap().len(), 3);
    }

    #[test]
    fn test_update_and_missing_user() {
        let (db, _dir) = db();
        let id = db.add_user(&named("Dana")).unwrap();
        let details = UserDetails {
            name: "Dana K".into(),
            email: Some("dana@example.com".into()),
            ..Default::default()
        };
        db.update_user(id, &details).unwrap();
        let user = db.user(id).unwrap().unwrap();
        assert_eq!(user.details, details);
        assert!(user.is_active);

        assert!(matches!(db.update_user(99, &details), Err(DbError::NotFound(_))));
        assert!(matches!(
            db.add_encoding(99, &Encoding::new(vec![1.0]), None),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_second_record_same_day_is_duplicate() {
        let (db, _dir) = db();
        let id = db.add_user(&named("Alice")).unwrap();
        let store: &dyn AttendanceStore = &db;

        store.insert_attendance(&record(id, at(3, 9, 0), Emotion::Happy)).unwrap();
        assert!(store.has_attendance(id, at(3, 0, 0).date()).unwrap());
        assert!(!store.has_attendance(id, at(4, 0, 0).date()).unwrap());

        let dup = store.insert_attendance(&record(id, at(3, 17, 0), Emotion::Neutral));
        assert!(matches!(dup, Err(StoreError::Duplicate { identity_id, .. }) if identity_id == id));
        store.insert_attendance(&record(id, at(4, 9, 0), Emotion::Neutral)).unwrap();
    }

    #[test]
    fn test_unknown_user_is_a_failure_not_a_duplicate() {
        let (db, _dir) = db();
        let store: Arc<dyn AttendanceStore> = Arc::new(db);

        let err = store
            .insert_attendance(&record(999, at(3, 9, 0), Emotion::Neutral))
            .unwrap_err();
        assert!(matches!(err, StoreError::Database(_)), "got {err:?}");

        let outcome = AttendanceRecorder::new(store).record(999, Emotion::Neutral, at(3, 9, 0));
        assert!(outcome.is_err());
    }

    #[test]
    fn test_stranger_image_saved_listed_and_deleted() {
        let (db, dir) = db();
        let crop = Frame::filled(8, 6, [200, 10, 10], 1);
        let id = db.save_stranger(&crop, at(5, 10, 30)).unwrap();

        let list = db.strangers().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, id);
        assert_eq!(list[0].first_seen, at(5, 10, 30));
        assert!(list[0].image_path.starts_with(dir.path().join("strangers")));

        let saved = image::open(&list[0].image_path).unwrap().to_rgb8();
        assert_eq!(saved.dimensions(), (8, 6));

        assert!(db.delete_stranger(id).unwrap());
        assert!(!list[0].image_path.exists());
        assert!(db.strangers().unwrap().is_empty());
        assert!(!db.delete_stranger(id).unwrap());
    }

    #[test]
    fn test_settings_round_trip() {
        let (db, _dir) = db();
        assert_eq!(db.setting("tolerance").unwrap(), None);
        db.set_setting("tolerance", "0.5").unwrap();
        db.set_setting("tolerance", "0.4").unwrap();
        assert_eq!(db.get_setting("tolerance").unwrap(), Some("0.4".into()));
        assert_eq!(db.settings().unwrap(), vec![("tolerance".into(), "0.4".into())]);
    }

    #[test]
    fn test_open_creates_file_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/attendance.db");
        {
            let db = Database::open(&path, dir.path().join("strangers")).unwrap();
            db.add_user(&named("Eve")).unwrap();
        }
        let db = Database::open(&path, dir.path().join("strangers")).unwrap();
        assert_eq!(db.users(false).unwrap()[0].details.name, "Eve");
    }

    #[test]
    fn test_default_admin_password_until_changed() {
        let (db, _dir) = db();
        assert!(db.verify_admin_password(DEFAULT_ADMIN_PASSWORD).unwrap());
        assert!(!db.verify_admin_password("letmein").unwrap());

        db.set_admin_password("s3cret").unwrap();
        assert!(db.verify_admin_password("s3cret").unwrap());
        assert!(!db.verify_admin_password(DEFAULT_ADMIN_PASSWORD).unwrap());

        let stored = db.setting(ADMIN_PASSWORD_KEY).unwrap().unwrap();
        assert!(stored.starts_with("$argon2"), "stored value must be a hash: {stored}");
        assert!(db.settings().unwrap().iter().all(|(k, _)| k != ADMIN_PASSWORD_KEY));
    }

    #[test]
    fn test_empty_admin_password_is_rejected() {
        let (db, _dir) = db();
        assert!(matches!(db.set_admin_password(""), Err(DbError::Password(_))));
        assert!(db.verify_admin_password(DEFAULT_ADMIN_PASSWORD).unwrap());
    }

    #[test]
    fn test_corrupt_admin_hash_is_an_error() {
        let (db, _dir) = db();
        db.set_setting(ADMIN_PASSWORD_KEY, "plain-text").unwrap();
        assert!(matches!(db.verify_admin_password("plain-text"), Err(DbError::Corrupt(_))));
    }
}
