use chrono::{DateTime, Utc};

/// Truncate a string to at most `max_bytes` bytes on a char boundary,
/// appending a trailing ellipsis when anything was cut.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> (String, bool) {
    if s.len() <= max_bytes {
        return (s.to_string(), false);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    let mut out = s[..end].to_string();
    out.push('…');
    (out, true)
}

/// Minute-granularity bucket of a timestamp, used as the second half of the
/// dedup uniqueness key.
pub fn minute_bucket(ts: DateTime<Utc>) -> i64 {
    ts.timestamp() / 60
}
