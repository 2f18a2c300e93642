//! GELF decoding: chunked UDP reassembly, gzip/zlib auto-detect, JSON payload.

mod chunks;

pub use chunks::{ChunkAssembler, ChunkOutcome, REASSEMBLY_TIMEOUT_SECS};

use chrono::{DateTime, Utc};
use flate2::read::{GzDecoder, ZlibDecoder};
use serde_json::Value;
use std::io::Read;

use crate::normalize::{EventDraft, LevelHint, SourceFields};
use crate::{Error, Result};

/// Decompress limit; a malicious tiny datagram must not balloon unbounded.
const MAX_INFLATED_BYTES: u64 = 8 * 1024 * 1024;

/// Decode one complete (reassembled, NUL-stripped) GELF payload.
pub fn decode(payload: &[u8]) -> Result<Vec<EventDraft>> {
    let inflated = inflate(payload)?;
    let value: Value = serde_json::from_slice(&inflated)?;
    let obj = value
        .as_object()
        .ok_or_else(|| Error::malformed("not_object", "GELF payload is not a JSON object"))?;

    let short_message = obj
        .get("short_message")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::malformed("missing_short_message", "GELF requires short_message"))?;

    let mut draft = EventDraft {
        message: short_message.to_string(),
        ..Default::default()
    };

    if let Some(host) = obj.get("host").and_then(Value::as_str) {
        draft.host = Some(host.to_string());
        draft.source = SourceFields {
            explicit_source: Some(host.to_string()),
            ..Default::default()
        };
    }

    if let Some(level) = obj.get("level").and_then(Value::as_i64) {
        draft.level = LevelHint::Parsed(logwarden_types::LogLevel::from_numeric(level));
    }

    // Seconds-since-epoch, optionally with fractional millis
    if let Some(ts) = obj.get("timestamp").and_then(Value::as_f64) {
        let millis = (ts * 1000.0) as i64;
        draft.timestamp = DateTime::<Utc>::from_timestamp_millis(millis);
    }

    // Deprecated but still common on the wire
    if let Some(facility) = obj.get("facility").and_then(Value::as_str) {
        draft.category = Some(facility.to_string());
    }

    // Additional fields keep their underscore-prefixed names in metadata
    let mut meta = serde_json::Map::new();
    for (key, value) in obj {
        if key.starts_with('_') {
            meta.insert(key.clone(), value.clone());
        }
    }
    if let Some(full) = obj.get("full_message").and_then(Value::as_str) {
        meta.insert("full_message".to_string(), Value::String(full.to_string()));
    }
    if let Some(dedup) = meta.get("_dedup_key").and_then(Value::as_str) {
        draft.dedup_key = Some(dedup.to_string());
    }
    if !meta.is_empty() {
        draft.metadata = Some(Value::Object(meta));
    }

    Ok(vec![draft])
}

fn inflate(payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match payload {
        [0x1f, 0x8b, ..] => {
            GzDecoder::new(payload)
                .take(MAX_INFLATED_BYTES)
                .read_to_end(&mut out)
                .map_err(Error::Compression)?;
        }
        [0x78, 0x01 | 0x9c | 0xda, ..] => {
            ZlibDecoder::new(payload)
                .take(MAX_INFLATED_BYTES)
                .read_to_end(&mut out)
                .map_err(Error::Compression)?;
        }
        _ => out.extend_from_slice(payload),
    }
    Ok(out)
}

/// Strip the NUL delimiter from a GELF TCP frame.
pub fn strip_nul(frame: &[u8]) -> &[u8] {
    match frame.last() {
        Some(0) => &frame[..frame.len() - 1],
        _ => frame,
    }
}
