use logwarden_types::{minute_bucket, LogEvent, LogLevel};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Row};

use crate::records::{EventSelection, FacetBucket, InsertOutcome};
use crate::{Database, Error, Result};

/// Column a facet enumeration buckets on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetField {
    Level,
    Source,
    Category,
}

impl FacetField {
    fn column(&self) -> &'static str {
        match self {
            FacetField::Level => "level",
            FacetField::Source => "source",
            FacetField::Category => "category",
        }
    }

    pub fn parse(s: &str) -> Option<FacetField> {
        match s {
            "level" => Some(FacetField::Level),
            "source" => Some(FacetField::Source),
            "category" => Some(FacetField::Category),
            _ => None,
        }
    }
}

impl Database {
    /// Write a batch in one transaction, assigning ids in slice order.
    ///
    /// Rows hitting the `(dedup_key, minute)` constraint are silently
    /// skipped and counted; their `id` stays `None`. Either the whole batch
    /// commits or the transaction fails and nothing is visible.
    pub fn insert_batch(&mut self, events: &mut [LogEvent]) -> Result<InsertOutcome> {
        let tx = self.conn_mut().transaction()?;
        let mut outcome = InsertOutcome::default();

        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT OR IGNORE INTO events
                    (ts_ms, ingest_ms, level, source, category, message, host,
                     peer_ip, geo, user_agent, tags, metadata, dedup_key, dedup_minute)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#,
            )?;

            for event in events.iter_mut() {
                let geo = event.geo.as_ref().map(serde_json::to_string).transpose()?;
                let user_agent = event
                    .user_agent
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                let tags = if event.tags.is_empty() {
                    None
                } else {
                    Some(serde_json::to_string(&event.tags)?)
                };
                let metadata = event.metadata.as_ref().map(serde_json::to_string).transpose()?;
                let dedup_minute = event.dedup_key.as_ref().map(|_| minute_bucket(event.timestamp));

                let changed = stmt.execute(rusqlite::params![
                    event.timestamp.timestamp_millis(),
                    event.ingest_time.timestamp_millis(),
                    event.level.as_str(),
                    event.source,
                    event.category,
                    event.message,
                    event.host,
                    event.peer_ip.map(|ip| ip.to_string()),
                    geo,
                    user_agent,
                    tags,
                    metadata,
                    event.dedup_key,
                    dedup_minute,
                ])?;

                if changed == 0 {
                    outcome.deduped += 1;
                } else {
                    event.id = Some(tx.last_insert_rowid());
                    outcome.inserted += 1;
                }
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// One page in `(ts_ms DESC, id DESC)` order.
    pub fn select_page(&self, sel: &EventSelection, limit: usize) -> Result<Vec<LogEvent>> {
        let (where_sql, params) = build_where(sel);
        let sql = format!(
            "SELECT id, ts_ms, ingest_ms, level, source, category, message, host, \
                    peer_ip, geo, user_agent, tags, metadata, dedup_key \
             FROM events {} ORDER BY ts_ms DESC, id DESC LIMIT {}",
            where_sql, limit
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params), row_to_event)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Top-`top_n` value buckets for one column under the same selection.
    pub fn facet_counts(
        &self,
        sel: &EventSelection,
        field: FacetField,
        top_n: usize,
    ) -> Result<Vec<FacetBucket>> {
        let (where_sql, params) = build_where(sel);
        let sql = format!(
            "SELECT {col}, COUNT(*) AS n FROM events {where_sql} \
             GROUP BY {col} ORDER BY n DESC, {col} ASC LIMIT {top_n}",
            col = field.column(),
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                Ok(FacetBucket {
                    value: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_events(&self, sel: &EventSelection) -> Result<i64> {
        let (where_sql, params) = build_where(sel);
        let sql = format!("SELECT COUNT(*) FROM events {}", where_sql);
        let count = self
            .conn()
            .query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(count)
    }

    pub fn count_all_events(&self) -> Result<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?)
    }

    pub fn get_event(&self, id: i64) -> Result<LogEvent> {
        let mut stmt = self.conn().prepare(
            "SELECT id, ts_ms, ingest_ms, level, source, category, message, host, \
                    peer_ip, geo, user_agent, tags, metadata, dedup_key \
             FROM events WHERE id = ?1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(row_to_event(row)?),
            None => Err(Error::NotFound(format!("event {}", id))),
        }
    }
}

fn build_where(sel: &EventSelection) -> (String, Vec<Value>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(from) = sel.time_from_ms {
        clauses.push("ts_ms >= ?".into());
        params.push(Value::Integer(from));
    }
    if let Some(to) = sel.time_to_ms {
        clauses.push("ts_ms <= ?".into());
        params.push(Value::Integer(to));
    }
    if !sel.levels.is_empty() {
        clauses.push(in_clause("level", sel.levels.len()));
        params.extend(sel.levels.iter().map(|l| Value::Text(l.as_str().to_string())));
    }
    if !sel.sources.is_empty() {
        clauses.push(in_clause("source", sel.sources.len()));
        params.extend(sel.sources.iter().map(|s| Value::Text(s.clone())));
    }
    if !sel.categories.is_empty() {
        clauses.push(in_clause("category", sel.categories.len()));
        params.extend(sel.categories.iter().map(|c| Value::Text(c.clone())));
    }
    if let Some(fts) = &sel.fts_match {
        clauses.push("id IN (SELECT rowid FROM events_fts WHERE events_fts MATCH ?)".into());
        params.push(Value::Text(fts.clone()));
    }
    if let Some(pattern) = &sel.like_pattern {
        clauses.push("message LIKE ? ESCAPE '\\'".into());
        params.push(Value::Text(pattern.clone()));
    }
    if let Some((ts, id)) = sel.before {
        clauses.push("(ts_ms < ? OR (ts_ms = ? AND id < ?))".into());
        params.push(Value::Integer(ts));
        params.push(Value::Integer(ts));
        params.push(Value::Integer(id));
    }

    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), params)
    }
}

fn in_clause(column: &str, n: usize) -> String {
    let marks = vec!["?"; n].join(", ");
    format!("{} IN ({})", column, marks)
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<LogEvent> {
    let ts_ms: i64 = row.get(1)?;
    let ingest_ms: i64 = row.get(2)?;
    let level: String = row.get(3)?;

    let geo: Option<String> = row.get(9)?;
    let user_agent: Option<String> = row.get(10)?;
    let tags: Option<String> = row.get(11)?;
    let metadata: Option<String> = row.get(12)?;

    Ok(LogEvent {
        id: Some(row.get(0)?),
        timestamp: chrono::DateTime::from_timestamp_millis(ts_ms).unwrap_or_default(),
        ingest_time: chrono::DateTime::from_timestamp_millis(ingest_ms).unwrap_or_default(),
        level: LogLevel::parse_lenient(&level).unwrap_or(LogLevel::Info),
        source: row.get(4)?,
        category: row.get(5)?,
        message: row.get(6)?,
        host: row.get(7)?,
        peer_ip: row
            .get::<_, Option<String>>(8)?
            .and_then(|ip| ip.parse().ok()),
        geo: geo.and_then(|g| serde_json::from_str(&g).ok()),
        user_agent: user_agent.and_then(|ua| serde_json::from_str(&ua).ok()),
        tags: tags
            .and_then(|t| serde_json::from_str(&t).ok())
            .unwrap_or_default(),
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        dedup_key: row.get(13)?,
    })
}
