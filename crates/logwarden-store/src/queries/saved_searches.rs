use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::records::{SavedSearchRecord, Visibility};
use crate::{Database, Error, Result};

fn row_to_saved(row: &rusqlite::Row<'_>) -> rusqlite::Result<SavedSearchRecord> {
    Ok(SavedSearchRecord {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        filter_spec: row.get(4)?,
        visibility: Visibility::parse(&row.get::<_, String>(5)?),
        created_at_ms: row.get(6)?,
        last_used_at_ms: row.get(7)?,
        use_count: row.get(8)?,
    })
}

const SAVED_COLUMNS: &str = "id, owner, name, description, filter_spec, visibility, \
                             created_at_ms, last_used_at_ms, use_count";

impl Database {
    /// Names are unique per owner; a duplicate is a conflict, not an upsert.
    pub fn create_saved_search(
        &mut self,
        owner: &str,
        name: &str,
        description: Option<&str>,
        filter_spec: &str,
        visibility: Visibility,
    ) -> Result<i64> {
        let now = Utc::now().timestamp_millis();
        let changed = self.conn().execute(
            "INSERT OR IGNORE INTO saved_searches
                 (owner, name, description, filter_spec, visibility, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![owner, name, description, filter_spec, visibility.as_str(), now],
        )?;
        if changed == 0 {
            return Err(Error::Conflict(format!(
                "saved search '{}' already exists for {}",
                name, owner
            )));
        }
        Ok(self.conn().last_insert_rowid())
    }

    pub fn get_saved_search(&self, id: i64) -> Result<Option<SavedSearchRecord>> {
        let record = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM saved_searches WHERE id = ?1", SAVED_COLUMNS),
                [id],
                row_to_saved,
            )
            .optional()?;
        Ok(record)
    }

    /// Everything the caller may see: their own plus public ones.
    pub fn list_saved_searches(&self, owner: &str) -> Result<Vec<SavedSearchRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM saved_searches
             WHERE owner = ?1 OR visibility = 'public'
             ORDER BY use_count DESC, name",
            SAVED_COLUMNS
        ))?;
        let records = stmt
            .query_map([owner], row_to_saved)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn update_saved_search(
        &mut self,
        id: i64,
        owner: &str,
        description: Option<&str>,
        filter_spec: &str,
        visibility: Visibility,
    ) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE saved_searches
             SET description = ?1, filter_spec = ?2, visibility = ?3
             WHERE id = ?4 AND owner = ?5",
            rusqlite::params![description, filter_spec, visibility.as_str(), id, owner],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("saved search {} for {}", id, owner)));
        }
        Ok(())
    }

    /// Owners delete their own; admins pass `admin = true` to delete any.
    pub fn delete_saved_search(&mut self, id: i64, owner: &str, admin: bool) -> Result<()> {
        let changed = if admin {
            self.conn()
                .execute("DELETE FROM saved_searches WHERE id = ?1", [id])?
        } else {
            self.conn().execute(
                "DELETE FROM saved_searches WHERE id = ?1 AND owner = ?2",
                rusqlite::params![id, owner],
            )?
        };
        if changed == 0 {
            return Err(Error::NotFound(format!("saved search {}", id)));
        }
        Ok(())
    }

    /// Stamp a use: bumps the counter and `last_used_at`.
    pub fn touch_saved_search(&mut self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE saved_searches
             SET use_count = use_count + 1, last_used_at_ms = ?1
             WHERE id = ?2",
            rusqlite::params![Utc::now().timestamp_millis(), id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_per_owner() {
        let mut db = Database::open_in_memory().unwrap();
        db.create_saved_search("alice", "errors", None, "{}", Visibility::Private)
            .unwrap();
        assert!(db
            .create_saved_search("alice", "errors", None, "{}", Visibility::Private)
            .is_err());
        // Same name, different owner is fine
        db.create_saved_search("bob", "errors", None, "{}", Visibility::Private)
            .unwrap();
    }

    #[test]
    fn listing_includes_public_of_others() {
        let mut db = Database::open_in_memory().unwrap();
        db.create_saved_search("alice", "mine", None, "{}", Visibility::Private)
            .unwrap();
        db.create_saved_search("bob", "shared", None, "{}", Visibility::Public)
            .unwrap();
        db.create_saved_search("bob", "hidden", None, "{}", Visibility::Private)
            .unwrap();

        let names: Vec<_> = db
            .list_saved_searches("alice")
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert!(names.contains(&"mine".to_string()));
        assert!(names.contains(&"shared".to_string()));
        assert!(!names.contains(&"hidden".to_string()));
    }

    #[test]
    fn owner_scope_on_delete() {
        let mut db = Database::open_in_memory().unwrap();
        let id = db
            .create_saved_search("alice", "s", None, "{}", Visibility::Private)
            .unwrap();
        assert!(db.delete_saved_search(id, "bob", false).is_err());
        db.delete_saved_search(id, "bob", true).unwrap();
    }

    #[test]
    fn touch_increments_use_count() {
        let mut db = Database::open_in_memory().unwrap();
        let id = db
            .create_saved_search("alice", "s", None, "{}", Visibility::Private)
            .unwrap();
        db.touch_saved_search(id).unwrap();
        db.touch_saved_search(id).unwrap();
        let s = db.get_saved_search(id).unwrap().unwrap();
        assert_eq!(s.use_count, 2);
        assert!(s.last_used_at_ms.is_some());
    }
}
