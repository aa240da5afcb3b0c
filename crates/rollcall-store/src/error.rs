use rollcall_core::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("password: {0}")]
    Password(String),
    #[error("{0} not found")]
    NotFound(String),
    /// A stored value did not parse back (bad date, unknown emotion).
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Io(io) => StoreError::Io(io),
            DbError::Image(img) => StoreError::Image(img.to_string()),
            DbError::NotFound(what) => StoreError::NotFound(what),
            other => StoreError::Database(other.to_string()),
        }
    }
}
