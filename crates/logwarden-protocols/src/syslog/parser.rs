use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use logwarden_types::LogLevel;
use serde_json::json;

use crate::normalize::{EventDraft, LevelHint};
use crate::{Error, Result};

use super::facility_name;

/// Split the leading `<PRI>` and return `(pri, remainder)`.
pub(crate) fn split_pri(text: &str) -> Result<(u8, &str)> {
    let rest = text
        .strip_prefix('<')
        .ok_or_else(|| Error::malformed("missing_pri", "message does not start with '<'"))?;
    let close = rest
        .find('>')
        .ok_or_else(|| Error::malformed("missing_pri", "unterminated PRI"))?;
    if close == 0 || close > 3 {
        return Err(Error::malformed("bad_pri", format!("PRI length {}", close)));
    }
    let pri: u16 = rest[..close]
        .parse()
        .map_err(|_| Error::malformed("bad_pri", &rest[..close]))?;
    if pri > 191 {
        return Err(Error::malformed("bad_pri", format!("PRI {} out of range", pri)));
    }
    Ok((pri as u8, &rest[close + 1..]))
}

fn base_draft(pri: u8) -> EventDraft {
    let severity = pri % 8;
    let facility = pri / 8;
    EventDraft {
        level: LevelHint::Parsed(LogLevel::from_syslog_severity(severity)),
        category: Some(facility_name(facility).to_string()),
        ..Default::default()
    }
}

/// RFC 3164: `TIMESTAMP HOSTNAME TAG: CONTENT`, timestamp `MMM dd hh:mm:ss`
/// with no year.  The year is inferred from `reference`, preferring the
/// candidate closest to arrival (handles the December/January boundary).
pub(crate) fn parse_rfc3164(pri: u8, rest: &str, reference: DateTime<Utc>) -> Result<EventDraft> {
    let mut draft = base_draft(pri);

    // Timestamp is a fixed 15-char field: "Oct 11 22:14:15" / "Oct  1 02:03:04"
    if rest.len() < 16 {
        return Err(Error::malformed("short_3164", rest));
    }
    let (ts_part, after_ts) = rest.split_at(15);
    draft.timestamp = parse_3164_timestamp(ts_part, reference);
    if draft.timestamp.is_none() {
        // Some emitters skip the timestamp entirely; keep the whole rest as message
        draft.message = rest.to_string();
        return Ok(draft);
    }

    let after_ts = after_ts.trim_start();
    let (host, content) = match after_ts.split_once(' ') {
        Some((host, content)) => (host, content),
        None => (after_ts, ""),
    };

    if !host.is_empty() && host != "-" {
        draft.host = Some(host.to_string());
        draft.source.explicit_source = Some(host.to_string());
    }

    draft.message = content.to_string();

    // TAG is conventionally "app[pid]:" or "app:" at the start of CONTENT
    if let Some(colon) = content.find(':') {
        let tag = &content[..colon];
        if !tag.is_empty() && tag.len() <= 32 && !tag.contains(' ') {
            let (app, pid) = match (tag.find('['), tag.ends_with(']')) {
                (Some(open), true) => (&tag[..open], Some(&tag[open + 1..tag.len() - 1])),
                _ => (tag, None),
            };
            let mut meta = json!({ "app_name": app });
            if let Some(pid) = pid {
                meta["proc_id"] = json!(pid);
            }
            draft.metadata = Some(meta);
        }
    }

    Ok(draft)
}

fn parse_3164_timestamp(ts: &str, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let month = match &ts[..3] {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    };
    let day: u32 = ts[4..6].trim().parse().ok()?;
    let hour: u32 = ts[7..9].parse().ok()?;
    let minute: u32 = ts[10..12].parse().ok()?;
    let second: u32 = ts[13..15].parse().ok()?;

    // Try the reference year and its neighbors, keep the candidate closest
    // to the reference instant.
    let mut best: Option<DateTime<Utc>> = None;
    for year in [reference.year() - 1, reference.year(), reference.year() + 1] {
        let candidate = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, second))
            .map(|naive| Utc.from_utc_datetime(&naive));
        if let Some(candidate) = candidate {
            let closer = match best {
                None => true,
                Some(current) => {
                    distance(candidate, reference) < distance(current, reference)
                }
            };
            if closer {
                best = Some(candidate);
            }
        }
    }
    best
}

fn distance(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    if a > b { a - b } else { b - a }
}

/// RFC 5424 (after the `VERSION ` prefix):
/// `TIMESTAMP HOSTNAME APP-NAME PROCID MSGID STRUCTURED-DATA [MSG]`.
pub(crate) fn parse_rfc5424(pri: u8, rest: &str) -> Result<EventDraft> {
    let mut draft = base_draft(pri);

    let mut parts = rest.splitn(6, ' ');
    let timestamp = parts
        .next()
        .ok_or_else(|| Error::malformed("short_5424", rest))?;
    let hostname = parts
        .next()
        .ok_or_else(|| Error::malformed("short_5424", rest))?;
    let app_name = parts
        .next()
        .ok_or_else(|| Error::malformed("short_5424", rest))?;
    let proc_id = parts
        .next()
        .ok_or_else(|| Error::malformed("short_5424", rest))?;
    let msg_id = parts
        .next()
        .ok_or_else(|| Error::malformed("short_5424", rest))?;
    let tail = parts.next().unwrap_or("");

    if timestamp != "-" {
        draft.timestamp = DateTime::parse_from_rfc3339(timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .ok();
        if draft.timestamp.is_none() {
            return Err(Error::malformed("bad_timestamp", timestamp));
        }
    }

    if hostname != "-" {
        draft.host = Some(hostname.to_string());
        draft.source.explicit_source = Some(hostname.to_string());
    }

    // STRUCTURED-DATA is either "-" or one or more bracketed elements
    let (structured, message) = split_structured_data(tail)?;

    let mut meta = serde_json::Map::new();
    if app_name != "-" {
        meta.insert("app_name".to_string(), json!(app_name));
        // app-name beats hostname as the origin identifier when present
        draft.source.explicit_source = Some(app_name.to_string());
    }
    if proc_id != "-" {
        meta.insert("proc_id".to_string(), json!(proc_id));
    }
    if msg_id != "-" {
        meta.insert("msg_id".to_string(), json!(msg_id));
    }
    if let Some(sd) = structured {
        meta.insert("structured_data".to_string(), json!(sd));
    }
    if !meta.is_empty() {
        draft.metadata = Some(serde_json::Value::Object(meta));
    }

    // Strip the optional UTF-8 BOM the RFC allows before MSG
    draft.message = message.strip_prefix('\u{feff}').unwrap_or(message).to_string();

    Ok(draft)
}

fn split_structured_data(tail: &str) -> Result<(Option<String>, &str)> {
    if let Some(rest) = tail.strip_prefix("- ") {
        return Ok((None, rest));
    }
    if tail == "-" {
        return Ok((None, ""));
    }
    if !tail.starts_with('[') {
        return Err(Error::malformed("bad_structured_data", tail));
    }

    // Scan bracketed elements honoring escaped `\]` inside param values
    let bytes = tail.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i] == b'[' {
        let mut escaped = false;
        let mut closed = false;
        i += 1;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' if !escaped => escaped = true,
                b']' if !escaped => {
                    closed = true;
                    i += 1;
                    break;
                }
                _ => escaped = false,
            }
            i += 1;
        }
        if !closed {
            return Err(Error::malformed("bad_structured_data", tail));
        }
    }

    let sd = &tail[..i];
    let message = tail[i..].strip_prefix(' ').unwrap_or(&tail[i..]);
    Ok((Some(sd.to_string()), message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pri_split() {
        let (pri, rest) = split_pri("<34>Oct 11").unwrap();
        assert_eq!(pri, 34);
        assert_eq!(rest, "Oct 11");
    }

    #[test]
    fn year_inference_across_new_year() {
        // Dec 31 message arriving Jan 1: the previous year must win
        let reference = Utc.with_ymd_and_hms(2025, 1, 1, 0, 10, 0).unwrap();
        let ts = parse_3164_timestamp("Dec 31 23:59:00", reference).unwrap();
        assert_eq!(ts.year(), 2024);
    }

    #[test]
    fn single_digit_day() {
        let reference = Utc.with_ymd_and_hms(2025, 10, 2, 0, 0, 0).unwrap();
        let ts = parse_3164_timestamp("Oct  1 02:03:04", reference).unwrap();
        assert_eq!(ts.day(), 1);
    }

    #[test]
    fn structured_data_with_escaped_bracket() {
        let (sd, msg) = split_structured_data("[x@1 k=\"a\\]b\"] tail msg").unwrap();
        assert_eq!(sd.unwrap(), "[x@1 k=\"a\\]b\"]");
        assert_eq!(msg, "tail msg");
    }

    #[test]
    fn multiple_sd_elements() {
        let (sd, msg) = split_structured_data("[a@1 x=\"1\"][b@2 y=\"2\"] m").unwrap();
        assert_eq!(sd.unwrap(), "[a@1 x=\"1\"][b@2 y=\"2\"]");
        assert_eq!(msg, "m");
    }
}
