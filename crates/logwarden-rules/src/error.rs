use std::fmt;

/// Result type for logwarden-rules operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the rule layer
#[derive(Debug)]
pub enum Error {
    /// A rule's stored query could not be parsed
    BadQuery(String),

    /// A rule's comparator string is outside the known set
    BadComparator(String),

    /// A correlation pattern is structurally invalid
    BadPattern(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadQuery(msg) => write!(f, "Invalid rule query: {}", msg),
            Error::BadComparator(cmp) => write!(f, "Unknown comparator: {}", cmp),
            Error::BadPattern(msg) => write!(f, "Invalid correlation pattern: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
