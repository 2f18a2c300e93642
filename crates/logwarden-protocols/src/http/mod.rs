//! Structured-JSON decoding for the authenticated `/log` endpoint.
//!
//! The body is a single record object or an array of them. Well-known keys
//! promote to columns; everything else rides along in `metadata`.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::normalize::{EventDraft, LevelHint, SourceFields};
use crate::{Error, Result};

/// Keys consumed by field extraction; the remainder becomes metadata.
const PROMOTED_KEYS: [&str; 13] = [
    "message",
    "msg",
    "text",
    "level",
    "severity",
    "timestamp",
    "time",
    "source",
    "category",
    "host",
    "tags",
    "dedup_key",
    "metadata",
];

pub fn decode(payload: &[u8]) -> Result<Vec<EventDraft>> {
    let value: Value = serde_json::from_slice(payload)?;
    match value {
        Value::Object(obj) => Ok(vec![draft_from_object(&obj)]),
        Value::Array(items) => {
            let mut drafts = Vec::with_capacity(items.len());
            for item in items {
                let obj = item.as_object().ok_or_else(|| {
                    Error::malformed("not_object", "array entries must be objects")
                })?;
                drafts.push(draft_from_object(obj));
            }
            Ok(drafts)
        }
        _ => Err(Error::malformed("not_object", "body must be an object or array")),
    }
}

/// Shared record-shaped extraction, also used by the Fluent decoder.
pub(crate) fn draft_from_object(obj: &Map<String, Value>) -> EventDraft {
    let message = obj
        .get("message")
        .or_else(|| obj.get("msg"))
        .or_else(|| obj.get("text"))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_default();

    let mut draft = EventDraft {
        message,
        ..Default::default()
    };

    if let Some(level) = obj.get("level").or_else(|| obj.get("severity")) {
        draft.level = match level {
            Value::String(s) => LevelHint::Raw(s.clone()),
            Value::Number(n) => n
                .as_i64()
                .map(|n| LevelHint::Parsed(logwarden_types::LogLevel::from_numeric(n)))
                .unwrap_or(LevelHint::None),
            _ => LevelHint::None,
        };
    }

    if let Some(ts) = obj.get("timestamp").or_else(|| obj.get("time")) {
        draft.timestamp = parse_timestamp(ts);
    }

    draft.source = SourceFields {
        automation_name: string_field(obj, "automation_name"),
        entity_id: string_field(obj, "entity_id"),
        domain: string_field(obj, "domain"),
        service: string_field(obj, "service"),
        explicit_source: string_field(obj, "source"),
    };

    draft.category = string_field(obj, "category");
    draft.host = string_field(obj, "host");
    draft.dedup_key = string_field(obj, "dedup_key");

    if let Some(Value::Array(tags)) = obj.get("tags") {
        for tag in tags {
            if let Value::String(tag) = tag {
                draft.tags.push(tag.clone());
            }
        }
    }

    // Explicit metadata object wins; otherwise collect the unpromoted keys.
    // Source-priority keys stay visible in metadata so nothing is lost.
    let mut meta = match obj.get("metadata") {
        Some(Value::Object(m)) => m.clone(),
        _ => Map::new(),
    };
    for (key, value) in obj {
        if !PROMOTED_KEYS.contains(&key.as_str()) && !meta.contains_key(key) {
            meta.insert(key.clone(), value.clone());
        }
    }
    if !meta.is_empty() {
        draft.metadata = Some(Value::Object(meta));
    }

    draft
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok(),
        Value::Number(n) => {
            if let Some(float) = n.as_f64() {
                // Heuristic: values past year 33658 as seconds are millis
                if float > 1e12 {
                    DateTime::<Utc>::from_timestamp_millis(float as i64)
                } else {
                    DateTime::<Utc>::from_timestamp_millis((float * 1000.0) as i64)
                }
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logwarden_types::{LogLevel, Protocol, RawFrame};

    fn frame(body: &Value) -> RawFrame {
        RawFrame::new(
            Protocol::Http,
            serde_json::to_vec(body).unwrap(),
            Some("192.0.2.77:55000".parse().unwrap()),
        )
    }

    #[test]
    fn single_record() {
        let body = serde_json::json!({
            "message": "login ok",
            "level": "info",
            "source": "auth-svc",
            "category": "auth",
            "dedup_key": "abc",
            "custom": 42
        });
        let f = frame(&body);
        let events: Vec<_> = decode(&f.payload)
            .unwrap()
            .into_iter()
            .map(|d| d.into_event(&f))
            .collect();
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.level, LogLevel::Info);
        assert_eq!(e.source, "auth-svc");
        assert_eq!(e.dedup_key.as_deref(), Some("abc"));
        assert_eq!(e.metadata.as_ref().unwrap()["custom"], 42);
    }

    #[test]
    fn array_of_records() {
        let body = serde_json::json!([
            {"message": "a"},
            {"message": "b"}
        ]);
        let f = frame(&body);
        assert_eq!(decode(&f.payload).unwrap().len(), 2);
    }

    #[test]
    fn automation_name_wins_source_priority() {
        let body = serde_json::json!({
            "message": "m",
            "automation_name": "nightly-backup",
            "entity_id": "switch.nas",
            "source": "app"
        });
        let f = frame(&body);
        let e = decode(&f.payload).unwrap().remove(0).into_event(&f);
        assert_eq!(e.source, "nightly-backup");
    }

    #[test]
    fn epoch_second_and_milli_timestamps() {
        let secs = parse_timestamp(&serde_json::json!(1700000000)).unwrap();
        let millis = parse_timestamp(&serde_json::json!(1700000000123i64)).unwrap();
        assert_eq!(secs.timestamp(), 1_700_000_000);
        assert_eq!(millis.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn scalar_body_is_malformed() {
        assert_eq!(decode(b"42").unwrap_err().reason(), "not_object");
    }
}
