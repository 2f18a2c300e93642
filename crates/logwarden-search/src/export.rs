use std::io::Write;
use std::time::Instant;

use logwarden_store::Database;
use logwarden_types::FilterSpec;

use crate::planner::plan;
use crate::{Error, Result};

pub const EXPORT_COLUMNS: [&str; 5] = ["timestamp", "level", "source", "category", "message"];

/// Page size per storage round-trip while streaming.
const EXPORT_CHUNK: usize = 1000;

/// Stream matching events as CSV in `(timestamp DESC, id DESC)` order.
///
/// Cursor-based: one logical pass, bounded memory. When `deadline` passes
/// mid-stream the rows written so far are flushed and `Timeout` is
/// returned, so the caller can still deliver the partial file.
pub fn export_csv<W: Write>(
    db: &Database,
    filter: &FilterSpec,
    out: W,
    deadline: Option<Instant>,
) -> Result<u64> {
    let query = plan(filter)?;
    let mut selection = query.selection.clone();

    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(EXPORT_COLUMNS)?;

    let mut written = 0u64;
    let mut scanned = 0usize;

    loop {
        let chunk = db.select_page(&selection, EXPORT_CHUNK)?;
        let exhausted = chunk.len() < EXPORT_CHUNK;
        scanned += chunk.len();

        for event in chunk {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    writer.flush().map_err(csv::Error::from)?;
                    return Err(Error::Timeout);
                }
            }

            selection.before = Some((event.timestamp.timestamp_millis(), event.id.unwrap_or(0)));

            let keep = match &query.verifier {
                Some(verifier) => verifier.matches(&event.message),
                None => true,
            };
            if keep {
                writer.write_record([
                    event.timestamp.to_rfc3339().as_str(),
                    event.level.as_str(),
                    event.source.as_str(),
                    event.category.as_str(),
                    event.message.as_str(),
                ])?;
                written += 1;
            }
        }

        if exhausted {
            break;
        }
        if let Some(cap) = query.scan_cap {
            if scanned >= cap {
                break;
            }
        }
    }

    writer.flush().map_err(csv::Error::from)?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use logwarden_types::{LogEvent, LogLevel, TextMatch};
    use std::time::Duration;

    fn seeded_db(n: i64) -> Database {
        let mut db = Database::open_in_memory().unwrap();
        let mut batch: Vec<LogEvent> = (0..n)
            .map(|i| {
                let ts = Utc.timestamp_opt(3_000_000 + i, 0).unwrap();
                LogEvent::new(ts, ts, LogLevel::Info, "s", "app", format!("row {}", i))
            })
            .collect();
        db.insert_batch(&mut batch).unwrap();
        db
    }

    #[test]
    fn header_plus_all_rows() {
        let db = seeded_db(5);
        let mut buf = Vec::new();
        let written = export_csv(&db, &FilterSpec::all(), &mut buf, None).unwrap();
        assert_eq!(written, 5);

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "timestamp,level,source,category,message");
        assert!(lines[1].contains("row 4"), "newest first");
    }

    #[test]
    fn filter_applies_to_export() {
        let db = seeded_db(10);
        let filter = FilterSpec::all().with_text("row 3", TextMatch::Substring);
        let mut buf = Vec::new();
        let written = export_csv(&db, &filter, &mut buf, None).unwrap();
        assert_eq!(written, 1);
    }

    #[test]
    fn expired_deadline_yields_timeout_with_partial() {
        let db = seeded_db(3);
        let mut buf = Vec::new();
        let deadline = Instant::now() - Duration::from_secs(1);
        let err = export_csv(&db, &FilterSpec::all(), &mut buf, Some(deadline)).unwrap_err();
        assert!(matches!(err, Error::Timeout));
        // Header was already flushed
        assert!(!buf.is_empty());
    }

    #[test]
    fn messages_with_commas_are_quoted() {
        let mut db = Database::open_in_memory().unwrap();
        let ts = Utc.timestamp_opt(3_000_000, 0).unwrap();
        let mut batch = vec![LogEvent::new(
            ts,
            ts,
            LogLevel::Info,
            "s",
            "app",
            "a,b \"quoted\"",
        )];
        db.insert_batch(&mut batch).unwrap();

        let mut buf = Vec::new();
        export_csv(&db, &FilterSpec::all(), &mut buf, None).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"a,b \"\"quoted\"\"\""));
    }
}
