//! Beats (Lumberjack v2) decoding.
//!
//! Wire grammar per the Elastic lumberjack protocol: a window frame (`2W`)
//! announces how many data frames follow before an ACK (`2A`) is owed;
//! data arrives as JSON frames (`2J`) either bare or wrapped in a
//! compressed frame (`2C`, zlib). Sequence numbers are u32, reset per
//! connection.

mod framing;

pub use framing::{make_ack, BeatsDecoder, BeatsProgress};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::normalize::{EventDraft, LevelHint, SourceFields};
use crate::{Error, Result};

/// Decode one JSON data-frame payload (one Beats record).
pub fn decode(payload: &[u8]) -> Result<Vec<EventDraft>> {
    let value: Value = serde_json::from_slice(payload)?;
    let obj = value
        .as_object()
        .ok_or_else(|| Error::malformed("not_object", "Beats record is not a JSON object"))?;

    let message = obj
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut draft = EventDraft {
        message,
        ..Default::default()
    };

    if let Some(ts) = obj.get("@timestamp").and_then(Value::as_str) {
        draft.timestamp = DateTime::parse_from_rfc3339(ts)
            .map(|dt| dt.with_timezone(&Utc))
            .ok();
    }

    // level may live at log.level (ECS) or top-level
    let level = obj
        .get("log")
        .and_then(|log| log.get("level"))
        .or_else(|| obj.get("level"))
        .and_then(Value::as_str);
    if let Some(level) = level {
        draft.level = LevelHint::Raw(level.to_string());
    }

    // hostname: ECS host.name, legacy beat.hostname
    let host = obj
        .get("host")
        .and_then(|h| h.get("name"))
        .or_else(|| obj.get("beat").and_then(|b| b.get("hostname")))
        .and_then(Value::as_str);
    if let Some(host) = host {
        draft.host = Some(host.to_string());
    }

    draft.source = SourceFields {
        explicit_source: obj
            .get("service")
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| draft.host.clone()),
        ..Default::default()
    };

    if let Some(event_dataset) = obj
        .get("event")
        .and_then(|e| e.get("dataset"))
        .and_then(Value::as_str)
    {
        draft.category = Some(event_dataset.to_string());
    }

    // Everything except the promoted fields rides along as metadata
    let mut meta = serde_json::Map::new();
    for (key, value) in obj {
        if !matches!(key.as_str(), "message" | "@timestamp" | "@metadata") {
            meta.insert(key.clone(), value.clone());
        }
    }
    if !meta.is_empty() {
        draft.metadata = Some(Value::Object(meta));
    }

    Ok(vec![draft])
}
