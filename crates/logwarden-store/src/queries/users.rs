use chrono::Utc;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};

use crate::records::UserRecord;
use crate::{Database, Error, Result};

/// Salted sha256; the salt rides in front of the hex digest.
pub(crate) fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{}${}", salt, hex::encode(hasher.finalize()))
}

pub(crate) fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, _)) => hash_password(password, salt) == stored,
        None => false,
    }
}

impl Database {
    pub fn create_user(
        &mut self,
        username: &str,
        password: &str,
        salt: &str,
        role: &str,
    ) -> Result<i64> {
        let now = Utc::now().timestamp_millis();
        let changed = self.conn().execute(
            "INSERT OR IGNORE INTO users (username, password_hash, role, created_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![username, hash_password(password, salt), role, now],
        )?;
        if changed == 0 {
            return Err(Error::Conflict(format!("user {} already exists", username)));
        }
        Ok(self.conn().last_insert_rowid())
    }

    pub fn get_user(&self, username: &str) -> Result<Option<UserRecord>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, username, password_hash, role, created_at_ms, last_login_at_ms
                 FROM users WHERE username = ?1",
                [username],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, username, password_hash, role, created_at_ms, last_login_at_ms
                 FROM users WHERE id = ?1",
                [id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Check credentials; on success stamps `last_login_at` and returns the user.
    pub fn authenticate_user(&mut self, username: &str, password: &str) -> Result<Option<UserRecord>> {
        let Some(user) = self.get_user(username)? else {
            return Ok(None);
        };
        if !verify_password(password, &user.password_hash) {
            return Ok(None);
        }
        self.conn().execute(
            "UPDATE users SET last_login_at_ms = ?1 WHERE id = ?2",
            rusqlite::params![Utc::now().timestamp_millis(), user.id],
        )?;
        Ok(Some(user))
    }

    pub fn set_user_password(&mut self, username: &str, password: &str, salt: &str) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE users SET password_hash = ?1 WHERE username = ?2",
            rusqlite::params![hash_password(password, salt), username],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("user {}", username)));
        }
        Ok(())
    }

    pub fn user_count(&self) -> Result<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        role: row.get(3)?,
        created_at_ms: row.get(4)?,
        last_login_at_ms: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_authenticate() {
        let mut db = Database::open_in_memory().unwrap();
        db.create_user("admin", "hunter2", "somesalt", "admin").unwrap();

        assert!(db.authenticate_user("admin", "hunter2").unwrap().is_some());
        assert!(db.authenticate_user("admin", "wrong").unwrap().is_none());
        assert!(db.authenticate_user("ghost", "hunter2").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_conflicts() {
        let mut db = Database::open_in_memory().unwrap();
        db.create_user("admin", "a", "s1", "admin").unwrap();
        assert!(matches!(
            db.create_user("admin", "b", "s2", "admin"),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn password_change_invalidates_old() {
        let mut db = Database::open_in_memory().unwrap();
        db.create_user("ops", "old", "s", "viewer").unwrap();
        db.set_user_password("ops", "new", "s2").unwrap();
        assert!(db.authenticate_user("ops", "old").unwrap().is_none());
        assert!(db.authenticate_user("ops", "new").unwrap().is_some());
    }

    #[test]
    fn hash_embeds_salt() {
        let h = hash_password("pw", "abc");
        assert!(h.starts_with("abc$"));
        assert!(verify_password("pw", &h));
        assert!(!verify_password("pw2", &h));
    }
}
