use chrono::Utc;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};

use crate::records::{ApiKeyRecord, AuthSessionRecord};
use crate::{Database, Result};

/// Tokens and API keys are stored hashed; a leaked database does not leak
/// live credentials.
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl Database {
    pub fn create_session(
        &mut self,
        token: &str,
        user_id: i64,
        ttl_seconds: i64,
        ip: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        self.conn().execute(
            "INSERT INTO auth_sessions (token_hash, user_id, created_at_ms, expires_at_ms, last_seen_at_ms, ip)
             VALUES (?1, ?2, ?3, ?4, ?3, ?5)",
            rusqlite::params![token_hash(token), user_id, now, now + ttl_seconds * 1000, ip],
        )?;
        Ok(())
    }

    /// Resolve a live session, bumping `last_seen_at`. Expired sessions
    /// resolve to `None` and are lazily deleted.
    pub fn resolve_session(&mut self, token: &str) -> Result<Option<AuthSessionRecord>> {
        let hash = token_hash(token);
        let now = Utc::now().timestamp_millis();

        let session = self
            .conn()
            .query_row(
                "SELECT token_hash, user_id, created_at_ms, expires_at_ms, last_seen_at_ms, ip
                 FROM auth_sessions WHERE token_hash = ?1",
                [&hash],
                |row| {
                    Ok(AuthSessionRecord {
                        token_hash: row.get(0)?,
                        user_id: row.get(1)?,
                        created_at_ms: row.get(2)?,
                        expires_at_ms: row.get(3)?,
                        last_seen_at_ms: row.get(4)?,
                        ip: row.get(5)?,
                    })
                },
            )
            .optional()?;

        match session {
            Some(s) if s.expires_at_ms > now => {
                self.conn().execute(
                    "UPDATE auth_sessions SET last_seen_at_ms = ?1 WHERE token_hash = ?2",
                    rusqlite::params![now, hash],
                )?;
                Ok(Some(s))
            }
            Some(_) => {
                self.conn()
                    .execute("DELETE FROM auth_sessions WHERE token_hash = ?1", [&hash])?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn delete_session(&mut self, token: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM auth_sessions WHERE token_hash = ?1",
            [token_hash(token)],
        )?;
        Ok(())
    }

    pub fn purge_expired_sessions(&mut self) -> Result<usize> {
        let now = Utc::now().timestamp_millis();
        let n = self.conn().execute(
            "DELETE FROM auth_sessions WHERE expires_at_ms <= ?1",
            [now],
        )?;
        Ok(n)
    }

    pub fn create_api_key(&mut self, key: &str, name: &str, user_id: i64) -> Result<i64> {
        let now = Utc::now().timestamp_millis();
        self.conn().execute(
            "INSERT INTO api_keys (key_hash, name, user_id, created_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![token_hash(key), name, user_id, now],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn resolve_api_key(&mut self, key: &str) -> Result<Option<ApiKeyRecord>> {
        let hash = token_hash(key);
        let record = self
            .conn()
            .query_row(
                "SELECT id, key_hash, name, user_id, created_at_ms, last_used_at_ms
                 FROM api_keys WHERE key_hash = ?1",
                [&hash],
                |row| {
                    Ok(ApiKeyRecord {
                        id: row.get(0)?,
                        key_hash: row.get(1)?,
                        name: row.get(2)?,
                        user_id: row.get(3)?,
                        created_at_ms: row.get(4)?,
                        last_used_at_ms: row.get(5)?,
                    })
                },
            )
            .optional()?;

        if record.is_some() {
            self.conn().execute(
                "UPDATE api_keys SET last_used_at_ms = ?1 WHERE key_hash = ?2",
                rusqlite::params![Utc::now().timestamp_millis(), hash],
            )?;
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lifecycle() {
        let mut db = Database::open_in_memory().unwrap();
        let uid = db.create_user("u", "p", "s", "admin").unwrap();

        db.create_session("tok-1", uid, 3600, Some("10.1.1.1")).unwrap();
        let s = db.resolve_session("tok-1").unwrap().unwrap();
        assert_eq!(s.user_id, uid);

        db.delete_session("tok-1").unwrap();
        assert!(db.resolve_session("tok-1").unwrap().is_none());
    }

    #[test]
    fn expired_session_resolves_to_none() {
        let mut db = Database::open_in_memory().unwrap();
        let uid = db.create_user("u", "p", "s", "admin").unwrap();
        db.create_session("tok-2", uid, -1, None).unwrap();
        assert!(db.resolve_session("tok-2").unwrap().is_none());
    }

    #[test]
    fn api_key_round_trip() {
        let mut db = Database::open_in_memory().unwrap();
        let uid = db.create_user("u", "p", "s", "admin").unwrap();
        db.create_api_key("key-abc", "ci", uid).unwrap();

        let k = db.resolve_api_key("key-abc").unwrap().unwrap();
        assert_eq!(k.name, "ci");
        assert!(db.resolve_api_key("other").unwrap().is_none());
    }
}
