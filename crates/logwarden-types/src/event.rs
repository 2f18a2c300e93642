use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::IpAddr;

use crate::level::LogLevel;

/// Messages above this are truncated with a trailing ellipsis and tagged.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Metadata blobs above this are dropped to null and tagged.
pub const MAX_METADATA_BYTES: usize = 8 * 1024;

/// Categories are clipped to this many characters.
pub const MAX_CATEGORY_CHARS: usize = 64;

/// Geographic attribution derived from the peer address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tz: Option<String>,
}

/// Parsed user-agent triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAgentInfo {
    pub browser: String,
    pub os: String,
    pub device: String,
}

/// The canonical normalized record.
///
/// Created by the normalizer, enriched in place, then immutable: persisted
/// rows are only ever removed by the retention engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    /// Monotonic identifier assigned at persistence; `None` until written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Event time (from the protocol when present, else arrival time).
    pub timestamp: DateTime<Utc>,

    /// Arrival time, always set from the frame's `received_at`.
    pub ingest_time: DateTime<Utc>,

    pub level: LogLevel,

    /// Short origin identifier, chosen by the source-priority rule.
    pub source: String,

    /// Free-form grouping, clipped to `MAX_CATEGORY_CHARS`.
    pub category: String,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Transport-level remote address; set for every network protocol.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_ip: Option<IpAddr>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<UserAgentInfo>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Opaque protocol-specific fields that do not promote to columns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,

    /// Client-supplied idempotency key; unique per `(key, minute(timestamp))`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
}

impl LogEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        ingest_time: DateTime<Utc>,
        level: LogLevel,
        source: impl Into<String>,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            timestamp,
            ingest_time,
            level,
            source: source.into(),
            category: category.into(),
            message: message.into(),
            host: None,
            peer_ip: None,
            geo: None,
            user_agent: None,
            tags: Vec::new(),
            metadata: None,
            dedup_key: None,
        }
    }

    /// Append a tag unless already present.
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.iter().any(|t| t == &tag) {
            self.tags.push(tag);
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LogEvent {
        let now = Utc::now();
        LogEvent::new(now, now, LogLevel::Info, "web-1", "http", "hello")
    }

    #[test]
    fn add_tag_dedups() {
        let mut e = sample();
        e.add_tag("truncated=true");
        e.add_tag("truncated=true");
        assert_eq!(e.tags.len(), 1);
        assert!(e.has_tag("truncated=true"));
    }

    #[test]
    fn serde_round_trip() {
        let mut e = sample();
        e.peer_ip = Some("192.0.2.7".parse().unwrap());
        e.metadata = Some(serde_json::json!({"_k": "v"}));

        let json = serde_json::to_string(&e).unwrap();
        let back: LogEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.source, "web-1");
        assert_eq!(back.peer_ip, e.peer_ip);
        assert_eq!(back.metadata, e.metadata);
    }

    #[test]
    fn unset_id_is_omitted_from_json() {
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json.get("id").is_none());
    }
}
