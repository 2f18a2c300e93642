use chrono::Utc;

use crate::records::AuditRecord;
use crate::{Database, Result};

impl Database {
    pub fn record_audit(
        &mut self,
        actor: &str,
        action: &str,
        resource: &str,
        ip: Option<&str>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO audit_log (at_ms, actor, action, resource, ip)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![Utc::now().timestamp_millis(), actor, action, resource, ip],
        )?;
        Ok(())
    }

    pub fn recent_audit(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, at_ms, actor, action, resource, ip
             FROM audit_log ORDER BY at_ms DESC, id DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map([limit as i64], |row| {
                Ok(AuditRecord {
                    id: row.get(0)?,
                    at_ms: row.get(1)?,
                    actor: row.get(2)?,
                    action: row.get(3)?,
                    resource: row.get(4)?,
                    ip: row.get(5)?,
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
    fn audit_round_trip() {
        let mut db = Database::open_in_memory().unwrap();
        db.record_audit("admin", "rule.create", "alert_rules/1", Some("10.0.0.2"))
            .unwrap();
        let records = db.recent_audit(5).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "rule.create");
        assert_eq!(records[0].ip.as_deref(), Some("10.0.0.2"));
    }
}
