use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::records::SettingRecord;
use crate::{Database, Result};

impl Database {
    pub fn get_setting(&self, key: &str) -> Result<Option<SettingRecord>> {
        let record = self
            .conn()
            .query_row(
                "SELECT key, value, value_type, updated_at_ms, updated_by
                 FROM settings WHERE key = ?1",
                [key],
                |row| {
                    Ok(SettingRecord {
                        key: row.get(0)?,
                        value: row.get(1)?,
                        value_type: row.get(2)?,
                        updated_at_ms: row.get(3)?,
                        updated_by: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Upsert a setting; every write is audited with the acting user.
    pub fn put_setting(
        &mut self,
        key: &str,
        value: &str,
        value_type: &str,
        updated_by: &str,
        ip: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let tx = self.conn_mut().transaction()?;
        tx.execute(
            r#"
            INSERT INTO settings (key, value, value_type, updated_at_ms, updated_by)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(key) DO UPDATE SET
                value = ?2,
                value_type = ?3,
                updated_at_ms = ?4,
                updated_by = ?5
            "#,
            rusqlite::params![key, value, value_type, now, updated_by],
        )?;
        tx.execute(
            "INSERT INTO audit_log (at_ms, actor, action, resource, ip)
             VALUES (?1, ?2, 'settings.update', ?3, ?4)",
            rusqlite::params![now, updated_by, key, ip],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_settings(&self) -> Result<Vec<SettingRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT key, value, value_type, updated_at_ms, updated_by
             FROM settings ORDER BY key",
        )?;
        let settings = stmt
            .query_map([], |row| {
                Ok(SettingRecord {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    value_type: row.get(2)?,
                    updated_at_ms: row.get(3)?,
                    updated_by: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_get() {
        let mut db = Database::open_in_memory().unwrap();
        db.put_setting("timezone", "Europe/Berlin", "string", "admin", None)
            .unwrap();
        let s = db.get_setting("timezone").unwrap().unwrap();
        assert_eq!(s.value, "Europe/Berlin");
        assert_eq!(s.updated_by, "admin");
    }

    #[test]
    fn update_overwrites_and_audits() {
        let mut db = Database::open_in_memory().unwrap();
        db.put_setting("theme", "dark", "string", "admin", Some("10.0.0.1"))
            .unwrap();
        db.put_setting("theme", "light", "string", "admin", Some("10.0.0.1"))
            .unwrap();
        assert_eq!(db.get_setting("theme").unwrap().unwrap().value, "light");

        let audits = db.recent_audit(10).unwrap();
        assert_eq!(audits.len(), 2);
        assert_eq!(audits[0].action, "settings.update");
    }

    #[test]
    fn missing_key_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_setting("nope").unwrap().is_none());
    }
}
