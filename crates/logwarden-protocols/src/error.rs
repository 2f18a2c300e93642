use std::fmt;

/// Result type for logwarden-protocols operations
pub type Result<T> = std::result::Result<T, Error>;

/// Decode failures for a single frame.
///
/// Every variant carries a short stable `reason` string; listeners count
/// drops per `(protocol, reason)` using it.
#[derive(Debug)]
pub enum Error {
    /// Frame bytes do not match the protocol's framing or grammar
    Malformed { reason: &'static str, detail: String },

    /// Payload decompression failed
    Compression(std::io::Error),

    /// Payload is not the expected JSON shape
    Json(serde_json::Error),

    /// Payload is not the expected msgpack shape
    MsgPack(rmp_serde::decode::Error),

    /// Payload is not valid UTF-8 where text was required
    Utf8(std::str::Utf8Error),
}

impl Error {
    pub fn malformed(reason: &'static str, detail: impl Into<String>) -> Self {
        Error::Malformed {
            reason,
            detail: detail.into(),
        }
    }

    /// Stable key for per-reason drop counters.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Malformed { reason, .. } => reason,
            Error::Compression(_) => "compression",
            Error::Json(_) => "bad_json",
            Error::MsgPack(_) => "bad_msgpack",
            Error::Utf8(_) => "bad_utf8",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Malformed { reason, detail } => write!(f, "Malformed frame ({}): {}", reason, detail),
            Error::Compression(err) => write!(f, "Decompression failed: {}", err),
            Error::Json(err) => write!(f, "JSON decode failed: {}", err),
            Error::MsgPack(err) => write!(f, "msgpack decode failed: {}", err),
            Error::Utf8(err) => write!(f, "Invalid UTF-8: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Malformed { .. } => None,
            Error::Compression(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::MsgPack(err) => Some(err),
            Error::Utf8(err) => Some(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Error::MsgPack(err)
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Error::Utf8(err)
    }
}
