use chrono::Utc;

use crate::records::FailedBatchRecord;
use crate::{Database, Result};

impl Database {
    /// Park a failed batch for background replay. Attempt starts at 1.
    pub fn enqueue_failed_batch(&mut self, payload_blob: &[u8]) -> Result<i64> {
        let now = Utc::now().timestamp_millis();
        self.conn().execute(
            "INSERT INTO failed_batches (payload_blob, first_failed_at_ms, last_attempt_at_ms, attempt)
             VALUES (?1, ?2, ?2, 1)",
            rusqlite::params![payload_blob, now],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Batches due for replay under the exponential backoff schedule
    /// `30s · 2^attempt`, capped at one hour. Quarantined rows never return.
    pub fn due_failed_batches(&self, now_ms: i64, limit: usize, max_attempts: u32) -> Result<Vec<FailedBatchRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, payload_blob, first_failed_at_ms, last_attempt_at_ms, attempt, quarantined
             FROM failed_batches
             WHERE quarantined = 0 AND attempt < ?1
             ORDER BY last_attempt_at_ms ASC
             LIMIT ?2",
        )?;
        let records = stmt
            .query_map(rusqlite::params![max_attempts, limit as i64], |row| {
                Ok(FailedBatchRecord {
                    id: row.get(0)?,
                    payload_blob: row.get(1)?,
                    first_failed_at_ms: row.get(2)?,
                    last_attempt_at_ms: row.get(3)?,
                    attempt: row.get(4)?,
                    quarantined: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records
            .into_iter()
            .filter(|r| r.last_attempt_at_ms + backoff_ms(r.attempt) <= now_ms)
            .collect())
    }

    pub fn delete_failed_batch(&mut self, id: i64) -> Result<()> {
        self.conn()
            .execute("DELETE FROM failed_batches WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Bump the attempt counter after another failed replay.
    pub fn bump_failed_batch(&mut self, id: i64) -> Result<u32> {
        let now = Utc::now().timestamp_millis();
        self.conn().execute(
            "UPDATE failed_batches SET attempt = attempt + 1, last_attempt_at_ms = ?1 WHERE id = ?2",
            rusqlite::params![now, id],
        )?;
        let attempt = self.conn().query_row(
            "SELECT attempt FROM failed_batches WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(attempt)
    }

    /// Terminal parking: the batch stops being replayed but stays inspectable.
    pub fn quarantine_failed_batch(&mut self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE failed_batches SET quarantined = 1 WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    pub fn failed_batch_counts(&self) -> Result<(i64, i64)> {
        let pending: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM failed_batches WHERE quarantined = 0",
            [],
            |row| row.get(0),
        )?;
        let quarantined: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM failed_batches WHERE quarantined = 1",
            [],
            |row| row.get(0),
        )?;
        Ok((pending, quarantined))
    }
}

/// Backoff before attempt N+1 is allowed, from the last attempt.
pub(crate) fn backoff_ms(attempt: u32) -> i64 {
    let base = 30_000i64;
    let capped = attempt.min(7); // 30s * 2^7 ≈ 64min, clamp below
    (base << capped).min(3_600_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_caps_at_one_hour() {
        assert_eq!(backoff_ms(0), 30_000);
        assert_eq!(backoff_ms(1), 60_000);
        assert_eq!(backoff_ms(4), 480_000);
        assert_eq!(backoff_ms(9), 3_600_000);
        assert_eq!(backoff_ms(30), 3_600_000);
    }

    #[test]
    fn enqueue_starts_at_attempt_one() {
        let mut db = Database::open_in_memory().unwrap();
        db.enqueue_failed_batch(b"[]").unwrap();
        let far_future = Utc::now().timestamp_millis() + 10 * 60_000;
        let due = db.due_failed_batches(far_future, 50, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attempt, 1);
    }

    #[test]
    fn not_due_before_backoff() {
        let mut db = Database::open_in_memory().unwrap();
        db.enqueue_failed_batch(b"[]").unwrap();
        let now = Utc::now().timestamp_millis();
        assert!(db.due_failed_batches(now, 50, 10).unwrap().is_empty());
    }

    #[test]
    fn quarantined_batches_never_return() {
        let mut db = Database::open_in_memory().unwrap();
        let id = db.enqueue_failed_batch(b"[]").unwrap();
        db.quarantine_failed_batch(id).unwrap();
        let far_future = Utc::now().timestamp_millis() + 100 * 60_000;
        assert!(db.due_failed_batches(far_future, 50, 10).unwrap().is_empty());
        assert_eq!(db.failed_batch_counts().unwrap(), (0, 1));
    }

    #[test]
    fn attempt_cap_excludes_batch() {
        let mut db = Database::open_in_memory().unwrap();
        let id = db.enqueue_failed_batch(b"[]").unwrap();
        for _ in 0..9 {
            db.bump_failed_batch(id).unwrap();
        }
        let far_future = Utc::now().timestamp_millis() + 1000 * 60_000;
        assert!(db.due_failed_batches(far_future, 50, 10).unwrap().is_empty());
    }
}
