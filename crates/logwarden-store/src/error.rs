use std::fmt;

/// Result type for logwarden-store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the storage layer
#[derive(Debug)]
pub enum Error {
    /// Underlying SQLite error
    Sqlite(rusqlite::Error),

    /// JSON (de)serialization of a stored column failed
    Json(serde_json::Error),

    /// A migration step could not be applied
    Migration(String),

    /// Row lookup by key found nothing
    NotFound(String),

    /// Uniqueness or ownership constraint violated
    Conflict(String),

    /// Backup creation or verification failed
    Backup(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Sqlite(err) => write!(f, "Database error: {}", err),
            Error::Json(err) => write!(f, "Stored JSON error: {}", err),
            Error::Migration(msg) => write!(f, "Migration failed: {}", msg),
            Error::NotFound(what) => write!(f, "Not found: {}", what),
            Error::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Error::Backup(msg) => write!(f, "Backup failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Sqlite(err) => Some(err),
            Error::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Sqlite(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}
