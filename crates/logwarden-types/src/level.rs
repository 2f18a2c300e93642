use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Severity of a log event.
///
/// Only these five values ever reach storage; anything else is folded to
/// `Info` at normalization time with a `normalized_level` tag recording the
/// original string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    /// Numeric rank used by the level-aware drop policy (higher = keep longer).
    pub fn rank(&self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warn => 2,
            LogLevel::Error => 3,
            LogLevel::Critical => 4,
        }
    }

    /// Case-folding parse accepting the common aliases seen on the wire.
    ///
    /// Returns `None` for strings outside the known set; the caller decides
    /// whether that is an error (filters) or a fold-to-info (normalization).
    pub fn parse_lenient(s: &str) -> Option<LogLevel> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" | "verbose" => Some(LogLevel::Debug),
            "info" | "information" | "notice" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" | "err" => Some(LogLevel::Error),
            "critical" | "crit" | "fatal" | "emergency" | "emerg" | "alert" | "panic" => {
                Some(LogLevel::Critical)
            }
            _ => None,
        }
    }

    /// Map a syslog severity number (RFC 5424 table 2) onto the level set.
    pub fn from_syslog_severity(severity: u8) -> LogLevel {
        match severity {
            0..=2 => LogLevel::Critical,
            3 => LogLevel::Error,
            4 => LogLevel::Warn,
            5 | 6 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }

    /// Map a GELF/syslog-style numeric level field.
    pub fn from_numeric(level: i64) -> LogLevel {
        match level {
            0..=2 => LogLevel::Critical,
            3 => LogLevel::Error,
            4 => LogLevel::Warn,
            5 | 6 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    /// Strict parse used by filters and the API surface.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            other => Err(Error::UnknownLevel(other.to_string())),
        }
    }
}
