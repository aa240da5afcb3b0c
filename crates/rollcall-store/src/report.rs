//! Read-only attendance queries and CSV export.

use crate::db::{parse_date, parse_emotion, parse_timestamp, Database, DATE_FORMAT, TIMESTAMP_FORMAT};
use crate::error::Result;
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::Emotion;
use rusqlite::params;
use serde::Serialize;
use std::io::Write;

const CSV_HEADER: [&str; 5] = ["Name", "Status", "Mood", "Date", "Timestamp"];

/// One attendance row joined with its user.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceEntry {
    pub id: i64,
    pub name: String,
    pub date: NaiveDate,
    pub timestamp: NaiveDateTime,
    /// False when the user has since been deactivated.
    pub active: bool,
    pub emotion: Emotion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttendanceStats {
    pub total_users: u32,
    pub present: u32,
    pub absent: u32,
}

/// One exported line, in `CSV_HEADER` column order.
#[derive(Serialize)]
struct CsvRow<'a> {
    name: &'a str,
    status: &'static str,
    mood: &'static str,
    date: String,
    timestamp: String,
}

type RawEntry = (i64, String, String, String, bool, String);

impl Database {
    /// Records for one day, newest first.
    pub fn attendance_on(&self, date: NaiveDate) -> Result<Vec<AttendanceEntry>> {
        self.attendance_range(date, date)
    }

    /// Records between `start` and `end` inclusive, newest first.
    pub fn attendance_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<AttendanceEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT a.id, u.name, a.date, a.timestamp, u.is_active, a.emotion
             FROM attendance a
             JOIN users u ON a.user_id = u.id
             WHERE a.date BETWEEN ?1 AND ?2
             ORDER BY a.date DESC, a.timestamp DESC",
        )?;
        let raw: Vec<RawEntry> = stmt
            .query_map(
                params![
                    start.format(DATE_FORMAT).to_string(),
                    end.format(DATE_FORMAT).to_string()
                ],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )?
            .collect::<std::result::Result<_, _>>()?;

        raw.into_iter()
            .map(|(id, name, date, ts, active, emotion)| {
                Ok(AttendanceEntry {
                    id,
                    name,
                    date: parse_date(&date)?,
                    timestamp: parse_timestamp(&ts)?,
                    active,
                    emotion: parse_emotion(&emotion)?,
                })
            })
            .collect()
    }

    /// Active users and how many of them checked in on `date`.
    pub fn stats(&self, date: NaiveDate) -> Result<AttendanceStats> {
        let conn = self.conn.lock();
        let total_users: u32 =
            conn.query_row("SELECT COUNT(*) FROM users WHERE is_active = 1", [], |row| row.get(0))?;
        let present: u32 = conn.query_row(
            "SELECT COUNT(DISTINCT a.user_id)
             FROM attendance a
             JOIN users u ON a.user_id = u.id
             WHERE a.date = ?1 AND u.is_active = 1",
            params![date.format(DATE_FORMAT).to_string()],
            |row| row.get(0),
        )?;
        Ok(AttendanceStats {
            total_users,
            present,
            absent: total_users.saturating_sub(present),
        })
    }

    /// Recorded mood counts for `date`, most common first.
    pub fn mood_stats(&self, date: NaiveDate) -> Result<Vec<(Emotion, u32)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT emotion, COUNT(*) AS n FROM attendance
             WHERE date = ?1
             GROUP BY emotion
             ORDER BY n DESC, emotion",
        )?;
        let raw: Vec<(String, u32)> = stmt
            .query_map(params![date.format(DATE_FORMAT).to_string()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<_, _>>()?;
        raw.into_iter()
            .map(|(label, n)| Ok((parse_emotion(&label)?, n)))
            .collect()
    }

    /// Check-ins per hour of day on `date`, for hours with any check-in.
    pub fn peak_hours(&self, date: NaiveDate) -> Result<Vec<(u32, u32)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT CAST(strftime('%H', timestamp) AS INTEGER) AS hour, COUNT(*)
             FROM attendance
             WHERE date = ?1
             GROUP BY hour
             ORDER BY hour",
        )?;
        let rows = stmt
            .query_map(params![date.format(DATE_FORMAT).to_string()], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// Users with the most check-ins, optionally only since `since`.
    pub fn top_attendees(&self, limit: u32, since: Option<NaiveDate>) -> Result<Vec<(String, u32)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT u.name, COUNT(a.id) AS n
             FROM users u
             JOIN attendance a ON u.id = a.user_id
             WHERE ?1 IS NULL OR a.date >= ?1
             GROUP BY u.id
             ORDER BY n DESC, u.name
             LIMIT ?2",
        )?;
        let since = since.map(|d| d.format(DATE_FORMAT).to_string());
        let rows = stmt
            .query_map(params![since, limit], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows)
    }

    /// Write the records between `start` and `end` as CSV. Returns the number
    /// of data rows written.
    pub fn export_csv<W: Write>(&self, start: NaiveDate, end: NaiveDate, out: W) -> Result<usize> {
        let entries = self.attendance_range(start, end)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
        writer.write_record(CSV_HEADER)?;
        for e in &entries {
            writer.serialize(CsvRow {
                name: &e.name,
                status: if e.active { "Active" } else { "Deleted" },
                mood: e.emotion.as_str(),
                date: e.date.format(DATE_FORMAT).to_string(),
                timestamp: e.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            })?;
        }
        writer.flush()?;
        tracing::info!(rows = entries.len(), %start, %end, "attendance exported");
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::UserDetails;
    use rollcall_core::{AttendanceRecord, AttendanceStore};
    use tempfile::TempDir;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 4, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, d).unwrap()
    }

    /// Alice, Bob and "Lee, Jr." with a few days of check-ins; Bob deactivated.
    fn populated() -> (Database, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory(dir.path().join("strangers")).unwrap();
        let user = |name: &str| {
            db.add_user(&UserDetails {
                name: name.into(),
                ..Default::default()
            })
            .unwrap()
        };
        let (alice, bob, lee) = (user("Alice"), user("Bob"), user("Lee, Jr."));

        let check_in = |id: i64, ts: NaiveDateTime, emotion: Emotion| {
            AttendanceStore::insert_attendance(
                &db,
                &AttendanceRecord {
                    identity_id: id,
                    date: ts.date(),
                    timestamp: ts,
                    emotion,
                },
            )
            .unwrap()
        };
        check_in(alice, at(1, 8, 50), Emotion::Happy);
        check_in(alice, at(2, 9, 5), Emotion::Neutral);
        check_in(bob, at(2, 9, 40), Emotion::Happy);
        check_in(lee, at(2, 8, 15), Emotion::Happy);
        check_in(alice, at(3, 8, 45), Emotion::Surprised);
        db.deactivate_user(bob).unwrap();
        (db, dir)
    }

    #[test]
    fn test_range_is_inclusive_and_newest_first() {
        let (db, _dir) = populated();
        let rows = db.attendance_range(day(1), day(2)).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Bob", "Alice", "Lee, Jr.", "Alice"]);
        assert!(!rows[0].active);
        assert_eq!(rows[1].emotion, Emotion::Neutral);

        assert_eq!(db.attendance_on(day(3)).unwrap().len(), 1);
    }

    #[test]
    fn test_stats_count_active_users_only() {
        let (db, _dir) = populated();
        let stats = db.stats(day(2)).unwrap();
        assert_eq!(
            stats,
            AttendanceStats {
                total_users: 2,
                present: 2,
                absent: 0
            }
        );
        assert_eq!(db.stats(day(3)).unwrap().absent, 1);
    }

    #[test]
    fn test_mood_and_peak_hours() {
        let (db, _dir) = populated();
        assert_eq!(
            db.mood_stats(day(2)).unwrap(),
            vec![(Emotion::Happy, 2), (Emotion::Neutral, 1)]
        );
        assert_eq!(db.peak_hours(day(2)).unwrap(), vec![(8, 1), (9, 2)]);
    }

    #[test]
    fn test_top_attendees() {
        let (db, _dir) = populated();
        let top = db.top_attendees(2, None).unwrap();
        assert_eq!(top[0], ("Alice".to_string(), 3));
        assert_eq!(top.len(), 2);

        let recent = db.top_attendees(5, Some(day(3))).unwrap();
        assert_eq!(recent, vec![("Alice".to_string(), 1)]);
    }

    #[test]
    fn test_delete_record() {
        let (db, _dir) = populated();
        let id = db.attendance_on(day(3)).unwrap()[0].id;
        assert!(db.delete_attendance(id).unwrap());
        assert!(!db.delete_attendance(id).unwrap());
        assert!(db.attendance_on(day(3)).unwrap().is_empty());
    }

    #[test]
    fn test_csv_export_quotes_fields() {
        let (db, _dir) = populated();
        let mut buf = Vec::new();
        let rows = db.export_csv(day(2), day(2), &mut buf).unwrap();
        assert_eq!(rows, 3);

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Name,Status,Mood,Date,Timestamp");
        assert_eq!(lines[1], "Bob,Deleted,Happy,2026-04-02,2026-04-02 09:40:00");
        assert_eq!(lines[3], "\"Lee, Jr.\",Active,Happy,2026-04-02,2026-04-02 08:15:00");
    }

    #[test]
    fn test_csv_export_round_trips_through_reader() {
        let (db, _dir) = populated();
        db.update_user(
            1,
            &UserDetails {
                name: "Alice \"Al\" Smith".into(),
                ..Default::default()
            },
        )
        .unwrap();
        let mut buf = Vec::new();
        db.export_csv(day(1), day(3), &mut buf).unwrap();

        let mut reader = csv::Reader::from_reader(buf.as_slice());
        assert_eq!(
            reader.headers().unwrap().iter().collect::<Vec<_>>(),
            vec!["Name", "Status", "Mood", "Date", "Timestamp"]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 5);
        assert_eq!(&rows[0][0], "Alice \"Al\" Smith");
        assert_eq!(&rows[0][2], "Surprised");
    }

    #[test]
    fn test_csv_export_of_empty_range_has_header_only() {
        let (db, _dir) = populated();
        let mut buf = Vec::new();
        assert_eq!(db.export_csv(day(20), day(21), &mut buf).unwrap(), 0);
        assert_eq!(String::from_utf8(buf).unwrap().trim_end(), "Name,Status,Mood,Date,Timestamp");
    }
}
