use std::fmt;

/// Result type for logwarden-runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the runtime layer
#[derive(Debug)]
pub enum Error {
    /// Storage layer error
    Store(logwarden_store::Error),

    /// Search layer error
    Search(logwarden_search::Error),

    /// Rule layer error
    Rules(logwarden_rules::Error),

    /// IO operation failed
    Io(std::io::Error),

    /// Configuration error (fatal at startup)
    Config(String),

    /// A listener port could not be bound
    PortInUse(u16),

    /// Invalid operation or state
    InvalidOperation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Store(err) => write!(f, "Store error: {}", err),
            Error::Search(err) => write!(f, "Search error: {}", err),
            Error::Rules(err) => write!(f, "Rules error: {}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::PortInUse(port) => write!(f, "Port {} already in use", port),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::Search(err) => Some(err),
            Error::Rules(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<logwarden_store::Error> for Error {
    fn from(err: logwarden_store::Error) -> Self {
        Error::Store(err)
    }
}

impl From<logwarden_search::Error> for Error {
    fn from(err: logwarden_search::Error) -> Self {
        Error::Search(err)
    }
}

impl From<logwarden_rules::Error> for Error {
    fn from(err: logwarden_rules::Error) -> Self {
        Error::Rules(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
