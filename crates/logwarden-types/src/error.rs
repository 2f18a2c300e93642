use std::fmt;

/// Result type for logwarden-types operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the types layer
#[derive(Debug)]
pub enum Error {
    /// A level string outside the known set (after case folding)
    UnknownLevel(String),

    /// A filter field failed validation
    InvalidFilter(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownLevel(s) => write!(f, "Unknown level: {}", s),
            Error::InvalidFilter(msg) => write!(f, "Invalid filter: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
