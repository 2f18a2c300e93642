//! Directory-tailed file decoding.
//!
//! Each tailed line becomes one frame. JSON-lines files get the structured
//! field extraction; anything else goes through a plain-text heuristic that
//! peels a leading timestamp and a level token when present.

mod reader;

pub use reader::{TailPosition, TailReader};

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::http::draft_from_object;
use crate::normalize::{EventDraft, LevelHint};
use crate::{Error, Result};

pub fn decode(payload: &[u8]) -> Result<Vec<EventDraft>> {
    let line = std::str::from_utf8(payload)?.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(Error::malformed("empty", "blank line"));
    }

    // JSON-lines heuristic: must parse as an object, not merely look like one
    if line.trim_start().starts_with('{') {
        if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str(line) {
            return Ok(vec![draft_from_object(&obj)]);
        }
    }

    Ok(vec![plain_text_draft(line)])
}

fn plain_text_draft(line: &str) -> EventDraft {
    let mut rest = line;
    let mut draft = EventDraft::default();

    if let Some((ts, after)) = take_leading_timestamp(rest) {
        draft.timestamp = Some(ts);
        rest = after;
    }

    if let Some((level, after)) = take_level_token(rest) {
        draft.level = LevelHint::Raw(level);
        rest = after;
    }

    draft.message = rest.trim_start().to_string();
    if draft.message.is_empty() {
        draft.message = line.to_string();
    }
    draft
}

/// Accepts `2025-06-01T12:00:00(.sss)(Z|±hh:mm)` and the space-separated
/// variant `2025-06-01 12:00:00`.
fn take_leading_timestamp(s: &str) -> Option<(DateTime<Utc>, &str)> {
    let candidate_len = s
        .char_indices()
        .take_while(|(i, c)| {
            *i < 35 && (c.is_ascii_digit() || matches!(c, '-' | ':' | 'T' | '.' | '+' | 'Z'))
        })
        .count();
    if candidate_len < 19 {
        // Try the "date<space>time" form
        if s.len() >= 19 {
            let candidate = &s[..19];
            if let Ok(naive) = NaiveDateTime::parse_from_str(candidate, "%Y-%m-%d %H:%M:%S") {
                return Some((naive.and_utc(), &s[19..]));
            }
        }
        return None;
    }

    let candidate = &s[..candidate_len];
    if let Ok(parsed) = DateTime::parse_from_rfc3339(candidate) {
        return Some((parsed.with_timezone(&Utc), &s[candidate_len..]));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(candidate, "%Y-%m-%dT%H:%M:%S") {
        return Some((naive.and_utc(), &s[candidate_len..]));
    }
    None
}

/// A level token is a short leading word, optionally bracketed, that folds
/// to a known level: `ERROR`, `[warn]`, `INFO:`.
fn take_level_token(s: &str) -> Option<(String, &str)> {
    let trimmed = s.trim_start();
    let offset = s.len() - trimmed.len();

    let word_end = trimmed
        .find(|c: char| c.is_whitespace())
        .unwrap_or(trimmed.len());
    let word = &trimmed[..word_end];
    let cleaned = word.trim_matches(|c: char| matches!(c, '[' | ']' | ':' | '-'));

    if cleaned.len() <= 9 && logwarden_types::LogLevel::parse_lenient(cleaned).is_some() {
        Some((cleaned.to_string(), &s[offset + word_end..]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logwarden_types::{LogLevel, Protocol, RawFrame};

    fn to_event(line: &str) -> logwarden_types::LogEvent {
        let frame = RawFrame::new(Protocol::FileTail, line.as_bytes().to_vec(), None);
        decode(&frame.payload)
            .unwrap()
            .remove(0)
            .into_event(&frame)
    }

    #[test]
    fn json_line() {
        let e = to_event(r#"{"message": "from file", "level": "error", "source": "cron"}"#);
        assert_eq!(e.level, LogLevel::Error);
        assert_eq!(e.source, "cron");
        assert!(e.peer_ip.is_none());
    }

    #[test]
    fn plain_line_with_timestamp_and_level() {
        let e = to_event("2025-06-01 12:00:00 ERROR disk is on fire");
        assert_eq!(e.level, LogLevel::Error);
        assert_eq!(e.message, "disk is on fire");
    }

    #[test]
    fn bracketed_level() {
        let e = to_event("[WARN] low memory");
        assert_eq!(e.level, LogLevel::Warn);
        assert_eq!(e.message, "low memory");
    }

    #[test]
    fn bare_line_defaults_to_info() {
        let e = to_event("just words");
        assert_eq!(e.level, LogLevel::Info);
        assert_eq!(e.message, "just words");
    }

    #[test]
    fn rfc3339_timestamp() {
        let e = to_event("2025-06-01T12:00:00Z info started");
        assert_eq!(e.level, LogLevel::Info);
        assert_eq!(e.message, "started");
    }

    #[test]
    fn broken_json_falls_back_to_plain() {
        let e = to_event("{not json at all");
        assert_eq!(e.message, "{not json at all");
    }

    #[test]
    fn blank_line_is_dropped() {
        assert_eq!(decode(b"   \n").unwrap_err().reason(), "empty");
    }
}
