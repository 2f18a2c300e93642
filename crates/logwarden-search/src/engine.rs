use logwarden_store::{queries::FacetField, Database, FacetBucket};
use logwarden_types::{FilterSpec, LogEvent};

use crate::cursor::{decode_cursor, encode_cursor};
use crate::planner::plan;
use crate::{Error, Result};

/// Hard ceiling on rows per page.
pub const PAGE_MAX: usize = 1000;

/// Chunk pulled from storage per round when in-process verification may
/// reject rows.
const VERIFY_CHUNK: usize = 256;

/// Facet enumeration returns at most this many buckets per field.
const FACET_TOP_N: usize = 100;

#[derive(Debug)]
pub struct SearchPage {
    pub rows: Vec<LogEvent>,
    /// Present when another page may exist; feed back as `filter.cursor`
    pub cursor: Option<String>,
    pub warning: Option<String>,
}

#[derive(Debug)]
pub struct FacetResult {
    pub field: String,
    pub buckets: Vec<FacetBucket>,
}

/// One stable page in `(timestamp DESC, id DESC)` order.
pub fn search(db: &Database, filter: &FilterSpec) -> Result<SearchPage> {
    let limit = filter.limit.unwrap_or(100).clamp(1, PAGE_MAX);
    let mut query = plan(filter)?;

    if let Some(cursor) = &filter.cursor {
        query.selection.before = Some(decode_cursor(cursor)?);
    }

    let mut rows: Vec<LogEvent> = Vec::with_capacity(limit);
    let mut scanned = 0usize;
    let mut selection = query.selection.clone();

    loop {
        let fetch = match &query.verifier {
            Some(_) => VERIFY_CHUNK,
            None => limit,
        };
        let chunk = db.select_page(&selection, fetch)?;
        let exhausted = chunk.len() < fetch;
        scanned += chunk.len();

        for event in chunk {
            let last = (event.timestamp.timestamp_millis(), event.id.unwrap_or(0));
            let keep = match &query.verifier {
                Some(verifier) => verifier.matches(&event.message),
                None => true,
            };
            selection.before = Some(last);
            if keep {
                rows.push(event);
                if rows.len() == limit {
                    break;
                }
            }
        }

        if rows.len() == limit || exhausted {
            break;
        }
        if let Some(cap) = query.scan_cap {
            if scanned >= cap {
                break;
            }
        }
        if query.verifier.is_none() {
            break;
        }
    }

    let cursor = if rows.len() == limit {
        rows.last()
            .map(|e| encode_cursor(e.timestamp.timestamp_millis(), e.id.unwrap_or(0)))
    } else {
        None
    };

    Ok(SearchPage {
        rows,
        cursor,
        warning: query.warning,
    })
}

/// Top-100 buckets per requested field under the same filter.
///
/// Buckets are computed from the storage-level selection; for text filters
/// the FTS prefilter applies but per-row verification does not, so regex
/// facet counts are upper bounds.
pub fn facets(db: &Database, filter: &FilterSpec, fields: &[String]) -> Result<Vec<FacetResult>> {
    let query = plan(filter)?;

    let mut results = Vec::with_capacity(fields.len());
    for field in fields {
        let facet_field = FacetField::parse(field)
            .ok_or_else(|| Error::BadFacetField(field.clone()))?;
        let buckets = db.facet_counts(&query.selection, facet_field, FACET_TOP_N)?;
        results.push(FacetResult {
            field: field.clone(),
            buckets,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use logwarden_types::{LogLevel, TextMatch};

    fn seeded_db(n: i64) -> Database {
        let mut db = Database::open_in_memory().unwrap();
        let mut batch: Vec<LogEvent> = (0..n)
            .map(|i| {
                let ts = Utc.timestamp_opt(1_000_000 + i, 0).unwrap();
                let level = if i % 3 == 0 { LogLevel::Error } else { LogLevel::Info };
                LogEvent::new(ts, ts, level, format!("src-{}", i % 2), "app", format!("message number {}", i))
            })
            .collect();
        db.insert_batch(&mut batch).unwrap();
        db
    }

    #[test]
    fn paginate_all_exactly_once() {
        let db = seeded_db(25);
        let mut filter = FilterSpec {
            limit: Some(10),
            ..FilterSpec::all()
        };

        let mut seen = Vec::new();
        loop {
            let page = search(&db, &filter).unwrap();
            seen.extend(page.rows.iter().map(|e| e.id.unwrap()));
            match page.cursor {
                Some(cursor) => filter.cursor = Some(cursor),
                None => break,
            }
        }

        assert_eq!(seen.len(), 25);
        let mut sorted = seen.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(seen, sorted, "descending order");
        sorted.dedup();
        assert_eq!(sorted.len(), 25, "no duplicates");
    }

    #[test]
    fn level_filter_applies() {
        let db = seeded_db(9);
        let filter = FilterSpec::all().with_levels(&[LogLevel::Error]);
        let page = search(&db, &filter).unwrap();
        assert_eq!(page.rows.len(), 3);
        assert!(page.rows.iter().all(|e| e.level == LogLevel::Error));
    }

    #[test]
    fn substring_search_verifies_case() {
        let mut db = Database::open_in_memory().unwrap();
        let ts = Utc.timestamp_opt(2_000_000, 0).unwrap();
        let mut batch = vec![
            LogEvent::new(ts, ts, LogLevel::Info, "s", "app", "Disk failure"),
            LogEvent::new(ts, ts, LogLevel::Info, "s", "app", "disk failure"),
        ];
        db.insert_batch(&mut batch).unwrap();

        let mut filter = FilterSpec::all().with_text("Disk", TextMatch::Substring);
        filter.case_sensitive = true;
        let page = search(&db, &filter).unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].message, "Disk failure");
    }

    #[test]
    fn regex_search_with_literals() {
        let mut db = Database::open_in_memory().unwrap();
        let ts = Utc.timestamp_opt(2_000_000, 0).unwrap();
        let mut batch = vec![
            LogEvent::new(ts, ts, LogLevel::Info, "s", "app", "error code 404 returned"),
            LogEvent::new(ts, ts, LogLevel::Info, "s", "app", "error code abc returned"),
        ];
        db.insert_batch(&mut batch).unwrap();

        let filter = FilterSpec::all().with_text(r"error code \d+", TextMatch::Regex);
        let page = search(&db, &filter).unwrap();
        assert_eq!(page.rows.len(), 1);
        assert!(page.rows[0].message.contains("404"));
        assert!(page.warning.is_none());
    }

    #[test]
    fn anchorless_regex_warns() {
        let db = seeded_db(3);
        let filter = FilterSpec::all().with_text(r"\d+", TextMatch::Regex);
        let page = search(&db, &filter).unwrap();
        assert!(page.warning.is_some());
        assert_eq!(page.rows.len(), 3);
    }

    #[test]
    fn bad_cursor_surfaces() {
        let db = seeded_db(1);
        let filter = FilterSpec {
            cursor: Some("bogus!!".to_string()),
            ..FilterSpec::all()
        };
        assert!(matches!(search(&db, &filter), Err(Error::BadCursor(_))));
    }

    #[test]
    fn facets_enumerate_levels_and_sources() {
        let db = seeded_db(9);
        let results = facets(
            &db,
            &FilterSpec::all(),
            &["level".to_string(), "source".to_string()],
        )
        .unwrap();
        assert_eq!(results.len(), 2);
        let levels = &results[0];
        assert!(levels.buckets.iter().any(|b| b.value == "error" && b.count == 3));
    }

    #[test]
    fn unknown_facet_field_rejected() {
        let db = seeded_db(1);
        let err = facets(&db, &FilterSpec::all(), &["host".to_string()]).unwrap_err();
        assert!(matches!(err, Error::BadFacetField(_)));
    }
}
