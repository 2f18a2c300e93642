use chrono::{DateTime, Duration, Utc};
use logwarden_types::{
    truncate_utf8, LogEvent, LogLevel, Protocol, RawFrame, MAX_CATEGORY_CHARS, MAX_MESSAGE_BYTES,
    MAX_METADATA_BYTES,
};
use serde_json::Value;

use crate::{beats, filetail, fluent, gelf, http, syslog, Result};

/// Level as decoded from the wire, before folding.
#[derive(Debug, Clone, Default)]
pub enum LevelHint {
    /// Protocol produced a value already inside the enum
    Parsed(LogLevel),
    /// Protocol carried a string the normalizer must fold
    Raw(String),
    /// Protocol had nothing; defaults to info
    #[default]
    None,
}

/// Candidate source identifiers in priority order:
/// `automation_name > entity_id > domain.service > explicit_source > category`.
#[derive(Debug, Clone, Default)]
pub struct SourceFields {
    pub automation_name: Option<String>,
    pub entity_id: Option<String>,
    pub domain: Option<String>,
    pub service: Option<String>,
    pub explicit_source: Option<String>,
}

impl SourceFields {
    fn resolve(&self, category: &str) -> String {
        if let Some(name) = non_empty(&self.automation_name) {
            return name;
        }
        if let Some(entity) = non_empty(&self.entity_id) {
            return entity;
        }
        if let (Some(domain), Some(service)) = (non_empty(&self.domain), non_empty(&self.service)) {
            return format!("{}.{}", domain, service);
        }
        if let Some(source) = non_empty(&self.explicit_source) {
            return source;
        }
        category.to_string()
    }
}

fn non_empty(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Decoded-but-unshaped event produced by each protocol module.
///
/// `into_event` applies the canonical shaping rules exactly once, so the
/// per-protocol decoders stay free of invariant logic.
#[derive(Debug, Clone, Default)]
pub struct EventDraft {
    pub timestamp: Option<DateTime<Utc>>,
    pub level: LevelHint,
    pub source: SourceFields,
    pub category: Option<String>,
    pub message: String,
    pub host: Option<String>,
    pub metadata: Option<Value>,
    pub dedup_key: Option<String>,
    pub tags: Vec<String>,
}

impl EventDraft {
    pub fn into_event(self, frame: &RawFrame) -> LogEvent {
        let ingest_time = frame.received_at;

        let mut tags = self.tags;
        let mut push_tag = |tags: &mut Vec<String>, tag: String| {
            if !tags.iter().any(|t| t == &tag) {
                tags.push(tag);
            }
        };

        // Event time with clock-skew clamping to [ingest-24h, ingest+1h]
        let mut timestamp = self.timestamp.unwrap_or(ingest_time);
        let floor = ingest_time - Duration::hours(24);
        let ceil = ingest_time + Duration::hours(1);
        if timestamp < floor {
            timestamp = floor;
            push_tag(&mut tags, "clock_skew=true".to_string());
        } else if timestamp > ceil {
            timestamp = ceil;
            push_tag(&mut tags, "clock_skew=true".to_string());
        }

        let level = match self.level {
            LevelHint::Parsed(level) => level,
            LevelHint::None => LogLevel::Info,
            LevelHint::Raw(raw) => match LogLevel::parse_lenient(&raw) {
                Some(level) => level,
                None => {
                    push_tag(&mut tags, format!("normalized_level={}", raw));
                    LogLevel::Info
                }
            },
        };

        let category = {
            let raw = self
                .category
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .unwrap_or(frame.proto.default_category());
            raw.chars().take(MAX_CATEGORY_CHARS).collect::<String>()
        };

        let (message, truncated) = truncate_utf8(&self.message, MAX_MESSAGE_BYTES);
        if truncated {
            push_tag(&mut tags, "truncated=true".to_string());
        }

        let metadata = self.metadata.filter(|value| {
            if value.is_null() {
                return false;
            }
            match serde_json::to_vec(value) {
                Ok(bytes) if bytes.len() <= MAX_METADATA_BYTES => true,
                _ => {
                    push_tag(&mut tags, "metadata_dropped=true".to_string());
                    false
                }
            }
        });

        let source = self.source.resolve(&category);

        let mut event = LogEvent::new(timestamp, ingest_time, level, source, category, message);
        event.host = self.host;
        event.peer_ip = frame.peer_addr.map(|addr| addr.ip());
        event.metadata = metadata;
        event.dedup_key = self.dedup_key;
        event.tags = tags;
        event
    }
}

/// Map a raw frame to canonical events.
///
/// Pure: no I/O, no clock reads (arrival time comes from the frame).
/// Returns `Err(reason)` for undecodable payloads; callers count those per
/// `(protocol, reason)`.
pub fn normalize_frame(frame: &RawFrame) -> Result<Vec<LogEvent>> {
    let drafts = match frame.proto {
        Protocol::SyslogUdp | Protocol::SyslogTcp => {
            syslog::decode(&frame.payload, frame.received_at)?
        }
        Protocol::GelfUdp | Protocol::GelfTcp => gelf::decode(&frame.payload)?,
        Protocol::Beats => beats::decode(&frame.payload)?,
        Protocol::Fluent => fluent::decode(&frame.payload)?,
        Protocol::Http => http::decode(&frame.payload)?,
        Protocol::FileTail => filetail::decode(&frame.payload)?,
    };

    Ok(drafts
        .into_iter()
        .map(|draft| draft.into_event(frame))
        .collect())
}
