use std::fmt;

/// Result type for logwarden-search operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to API callers as structured responses, not logged as
/// server failures (except `Store`).
#[derive(Debug)]
pub enum Error {
    /// Filter carried an uncompilable regular expression
    BadRegex(String),

    /// Filter referenced a level outside the enum
    BadLevel(String),

    /// Pagination cursor was not produced by this server
    BadCursor(String),

    /// Facet field outside {level, source, category}
    BadFacetField(String),

    /// Request payload failed validation
    BadInput(String),

    /// Per-operation deadline exceeded; partial output may have been flushed
    Timeout,

    /// Underlying storage failure
    Store(logwarden_store::Error),

    /// CSV serialization failure during export
    Csv(csv::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadRegex(msg) => write!(f, "Invalid regex: {}", msg),
            Error::BadLevel(level) => write!(f, "Unknown level: {}", level),
            Error::BadCursor(msg) => write!(f, "Malformed cursor: {}", msg),
            Error::BadFacetField(field) => write!(f, "Unknown facet field: {}", field),
            Error::BadInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::Timeout => write!(f, "Operation deadline exceeded"),
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::Csv(err) => write!(f, "CSV error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::Csv(err) => Some(err),
            _ => None,
        }
    }
}

impl From<logwarden_store::Error> for Error {
    fn from(err: logwarden_store::Error) -> Self {
        Error::Store(err)
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Csv(err)
    }
}
