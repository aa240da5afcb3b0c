//! rollcall-store — SQLite persistence for the attendance terminal.
//!
//! Implements [`rollcall_core::AttendanceStore`] for the session pipeline and
//! exposes the administrative queries (enrollment, reports, stranger log,
//! settings, administrator password, CSV export) used by the CLI.

pub mod db;
pub mod error;
pub mod report;

pub use db::{Database, StrangerEntry, User, UserDetails, ADMIN_PASSWORD_KEY, DEFAULT_ADMIN_PASSWORD};
pub use error::DbError;
pub use report::{AttendanceEntry, AttendanceStats};
