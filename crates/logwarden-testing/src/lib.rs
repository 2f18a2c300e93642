//! Fixtures and wire-format builders shared by integration tests.
//!
//! The builders emit byte-exact protocol payloads so tests can drive the
//! decoders the way real senders would, without a network.

use chrono::{DateTime, Utc};
use logwarden_types::{LogEvent, LogLevel};

/// A minimal valid event with fixed timestamps, for storage-level tests.
pub fn event_at(ts: DateTime<Utc>, level: LogLevel, source: &str, message: &str) -> LogEvent {
    LogEvent::new(ts, ts, level, source, "test", message)
}

pub fn event(level: LogLevel, message: &str) -> LogEvent {
    let now = Utc::now();
    event_at(now, level, "test-source", message)
}

/// RFC 3164 syslog line with the given PRI.
pub fn syslog_rfc3164(pri: u8, host: &str, tag: &str, content: &str) -> Vec<u8> {
    format!("<{}>Oct 11 22:14:15 {} {}: {}", pri, host, tag, content).into_bytes()
}

/// RFC 5424 syslog line.
pub fn syslog_rfc5424(pri: u8, host: &str, app: &str, message: &str) -> Vec<u8> {
    format!(
        "<{}>1 2025-06-01T12:00:00.000Z {} {} 77 ID1 - {}",
        pri, host, app, message
    )
    .into_bytes()
}

/// Plain (uncompressed) GELF JSON payload.
pub fn gelf_payload(host: &str, short_message: &str, level: i64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "version": "1.1",
        "host": host,
        "short_message": short_message,
        "level": level,
        "_k": "v",
    }))
    .unwrap()
}

/// Split a payload into GELF UDP chunks with the standard 12-byte header.
pub fn gelf_chunks(message_id: u64, payload: &[u8], parts: usize) -> Vec<Vec<u8>> {
    assert!(parts > 0 && parts <= 128);
    let chunk_len = payload.len().div_ceil(parts);
    payload
        .chunks(chunk_len)
        .enumerate()
        .map(|(seq, part)| {
            let mut datagram = Vec::with_capacity(12 + part.len());
            datagram.extend_from_slice(&[0x1e, 0x0f]);
            datagram.extend_from_slice(&message_id.to_be_bytes());
            datagram.push(seq as u8);
            datagram.push(parts as u8);
            datagram.extend_from_slice(part);
            datagram
        })
        .collect()
}

/// Lumberjack v2 window frame.
pub fn beats_window(size: u32) -> Vec<u8> {
    let mut frame = vec![b'2', b'W'];
    frame.extend_from_slice(&size.to_be_bytes());
    frame
}

/// Lumberjack v2 JSON data frame.
pub fn beats_json(seq: u32, record: &serde_json::Value) -> Vec<u8> {
    let payload = serde_json::to_vec(record).unwrap();
    let mut frame = vec![b'2', b'J'];
    frame.extend_from_slice(&seq.to_be_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    frame
}

/// Lumberjack v2 compressed envelope wrapping already-framed bytes.
pub fn beats_compressed(frames: &[u8]) -> Vec<u8> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(frames).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut frame = vec![b'2', b'C'];
    frame.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
    frame.extend_from_slice(&compressed);
    frame
}

/// Fluent forward entry `[tag, time, record]` as JSON bytes.
pub fn fluent_entry(tag: &str, time: i64, record: &serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!([tag, time, record])).unwrap()
}

/// Assert two events are the same logical record (identity fields only,
/// ignoring ids and arrival stamps).
pub fn assert_same_event(a: &LogEvent, b: &LogEvent) {
    assert_eq!(a.level, b.level, "level");
    assert_eq!(a.source, b.source, "source");
    assert_eq!(a.category, b.category, "category");
    assert_eq!(a.message, b.message, "message");
    assert_eq!(a.host, b.host, "host");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_builder_covers_payload() {
        let payload = b"0123456789".to_vec();
        let chunks = gelf_chunks(7, &payload, 3);
        assert_eq!(chunks.len(), 3);
        let reassembled: Vec<u8> = chunks.iter().flat_map(|c| c[12..].to_vec()).collect();
        assert_eq!(reassembled, payload);
        assert_eq!(&chunks[0][..2], &[0x1e, 0x0f]);
        assert_eq!(chunks[2][10], 2);
        assert_eq!(chunks[2][11], 3);
    }

    #[test]
    fn beats_json_frame_layout() {
        let frame = beats_json(5, &serde_json::json!({"message": "x"}));
        assert_eq!(frame[0], b'2');
        assert_eq!(frame[1], b'J');
        assert_eq!(u32::from_be_bytes(frame[2..6].try_into().unwrap()), 5);
    }
}
