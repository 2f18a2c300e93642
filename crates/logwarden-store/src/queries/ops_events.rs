use chrono::Utc;

use crate::records::OpsEventRecord;
use crate::{Database, Result};

impl Database {
    /// Operational events feed the notification layer and the ops API.
    pub fn record_ops_event(&mut self, kind: &str, data: &serde_json::Value) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO ops_events (at_ms, kind, data) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                Utc::now().timestamp_millis(),
                kind,
                serde_json::to_string(data)?
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn recent_ops_events(&self, limit: usize) -> Result<Vec<OpsEventRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, at_ms, kind, data FROM ops_events
             ORDER BY at_ms DESC, id DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map([limit as i64], |row| {
                let data: String = row.get(3)?;
                Ok(OpsEventRecord {
                    id: row.get(0)?,
                    at_ms: row.get(1)?,
                    kind: row.get(2)?,
                    data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ops_event_round_trip() {
        let mut db = Database::open_in_memory().unwrap();
        db.record_ops_event("gelf_reassembly_timeout", &serde_json::json!({"dropped": 3}))
            .unwrap();
        let events = db.recent_ops_events(10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "gelf_reassembly_timeout");
        assert_eq!(events[0].data["dropped"], 3);
    }
}
