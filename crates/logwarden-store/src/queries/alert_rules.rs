use logwarden_types::LogLevel;
use rusqlite::OptionalExtension;

use crate::records::{AlertHistoryRecord, AlertRuleRecord};
use crate::{Database, Error, Result};

const RULE_COLUMNS: &str = "id, name, query, window_seconds, threshold, comparator, \
                            severity, cooldown_seconds, enabled, last_fired_at_ms";

fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertRuleRecord> {
    Ok(AlertRuleRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        query: row.get(2)?,
        window_seconds: row.get(3)?,
        threshold: row.get::<_, i64>(4)? as u64,
        comparator: row.get(5)?,
        severity: LogLevel::parse_lenient(&row.get::<_, String>(6)?).unwrap_or(LogLevel::Warn),
        cooldown_seconds: row.get(7)?,
        enabled: row.get(8)?,
        last_fired_at_ms: row.get(9)?,
    })
}

impl Database {
    pub fn create_alert_rule(&mut self, rule: &AlertRuleRecord) -> Result<i64> {
        let changed = self.conn().execute(
            "INSERT OR IGNORE INTO alert_rules
                 (name, query, window_seconds, threshold, comparator, severity,
                  cooldown_seconds, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                rule.name,
                rule.query,
                rule.window_seconds,
                rule.threshold as i64,
                rule.comparator,
                rule.severity.as_str(),
                rule.cooldown_seconds,
                rule.enabled,
            ],
        )?;
        if changed == 0 {
            return Err(Error::Conflict(format!("alert rule '{}' already exists", rule.name)));
        }
        Ok(self.conn().last_insert_rowid())
    }

    pub fn update_alert_rule(&mut self, rule: &AlertRuleRecord) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE alert_rules SET
                 name = ?1, query = ?2, window_seconds = ?3, threshold = ?4,
                 comparator = ?5, severity = ?6, cooldown_seconds = ?7, enabled = ?8
             WHERE id = ?9",
            rusqlite::params![
                rule.name,
                rule.query,
                rule.window_seconds,
                rule.threshold as i64,
                rule.comparator,
                rule.severity.as_str(),
                rule.cooldown_seconds,
                rule.enabled,
                rule.id,
            ],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("alert rule {}", rule.id)));
        }
        Ok(())
    }

    pub fn delete_alert_rule(&mut self, id: i64) -> Result<()> {
        let changed = self
            .conn()
            .execute("DELETE FROM alert_rules WHERE id = ?1", [id])?;
        if changed == 0 {
            return Err(Error::NotFound(format!("alert rule {}", id)));
        }
        Ok(())
    }

    pub fn get_alert_rule(&self, id: i64) -> Result<Option<AlertRuleRecord>> {
        let rule = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM alert_rules WHERE id = ?1", RULE_COLUMNS),
                [id],
                row_to_rule,
            )
            .optional()?;
        Ok(rule)
    }

    pub fn list_alert_rules(&self) -> Result<Vec<AlertRuleRecord>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {} FROM alert_rules ORDER BY id", RULE_COLUMNS))?;
        let rules = stmt
            .query_map([], row_to_rule)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    /// Firing history is append-only; the rule row keeps the latest stamp.
    pub fn record_alert_fired(&mut self, history: &AlertHistoryRecord) -> Result<i64> {
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO alert_history
                 (rule_id, fired_at_ms, window_start_ms, window_end_ms, matched_count, severity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                history.rule_id,
                history.fired_at_ms,
                history.window_start_ms,
                history.window_end_ms,
                history.matched_count,
                history.severity.as_str(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE alert_rules SET last_fired_at_ms = ?1 WHERE id = ?2",
            rusqlite::params![history.fired_at_ms, history.rule_id],
        )?;
        tx.commit()?;
        Ok(id)
    }

    pub fn list_alert_history(&self, rule_id: Option<i64>, limit: usize) -> Result<Vec<AlertHistoryRecord>> {
        let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<AlertHistoryRecord> {
            Ok(AlertHistoryRecord {
                id: row.get(0)?,
                rule_id: row.get(1)?,
                fired_at_ms: row.get(2)?,
                window_start_ms: row.get(3)?,
                window_end_ms: row.get(4)?,
                matched_count: row.get(5)?,
                severity: LogLevel::parse_lenient(&row.get::<_, String>(6)?)
                    .unwrap_or(LogLevel::Warn),
            })
        };

        let records = match rule_id {
            Some(rule_id) => {
                let mut stmt = self.conn().prepare(
                    "SELECT id, rule_id, fired_at_ms, window_start_ms, window_end_ms,
                            matched_count, severity
                     FROM alert_history WHERE rule_id = ?1
                     ORDER BY fired_at_ms DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(rusqlite::params![rule_id, limit as i64], map)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.conn().prepare(
                    "SELECT id, rule_id, fired_at_ms, window_start_ms, window_end_ms,
                            matched_count, severity
                     FROM alert_history ORDER BY fired_at_ms DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map([limit as i64], map)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str) -> AlertRuleRecord {
        AlertRuleRecord {
            id: 0,
            name: name.to_string(),
            query: r#"{"levels":["error"]}"#.to_string(),
            window_seconds: 60,
            threshold: 5,
            comparator: ">=".to_string(),
            severity: LogLevel::Error,
            cooldown_seconds: 300,
            enabled: true,
            last_fired_at_ms: None,
        }
    }

    #[test]
    fn crud_cycle() {
        let mut db = Database::open_in_memory().unwrap();
        let id = db.create_alert_rule(&rule("too-many-errors")).unwrap();

        let mut loaded = db.get_alert_rule(id).unwrap().unwrap();
        assert_eq!(loaded.threshold, 5);

        loaded.threshold = 10;
        db.update_alert_rule(&loaded).unwrap();
        assert_eq!(db.get_alert_rule(id).unwrap().unwrap().threshold, 10);

        db.delete_alert_rule(id).unwrap();
        assert!(db.get_alert_rule(id).unwrap().is_none());
    }

    #[test]
    fn history_updates_last_fired() {
        let mut db = Database::open_in_memory().unwrap();
        let id = db.create_alert_rule(&rule("r")).unwrap();

        db.record_alert_fired(&AlertHistoryRecord {
            id: 0,
            rule_id: id,
            fired_at_ms: 123_000,
            window_start_ms: 60_000,
            window_end_ms: 120_000,
            matched_count: 7,
            severity: LogLevel::Error,
        })
        .unwrap();

        assert_eq!(db.get_alert_rule(id).unwrap().unwrap().last_fired_at_ms, Some(123_000));
        let history = db.list_alert_history(Some(id), 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].matched_count, 7);
    }

    #[test]
    fn duplicate_name_conflicts() {
        let mut db = Database::open_in_memory().unwrap();
        db.create_alert_rule(&rule("dup")).unwrap();
        assert!(db.create_alert_rule(&rule("dup")).is_err());
    }
}
