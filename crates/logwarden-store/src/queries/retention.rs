use logwarden_types::{PolicyKind, RetentionPolicy};

use crate::{Database, Result};

/// What one retention pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionStats {
    pub rows_deleted: u64,
    pub batches: u64,
}

impl Database {
    /// Apply one policy, deleting in bounded batches so no transaction holds
    /// the writer lock for long. `now_ms` is passed in for testability.
    pub fn evict_by_policy(
        &mut self,
        policy: &RetentionPolicy,
        now_ms: i64,
        batch_size: usize,
    ) -> Result<EvictionStats> {
        let mut stats = EvictionStats::default();
        loop {
            let deleted = self.evict_batch(policy, now_ms, batch_size)?;
            if deleted == 0 {
                break;
            }
            stats.rows_deleted += deleted as u64;
            stats.batches += 1;
        }
        Ok(stats)
    }

    fn evict_batch(&mut self, policy: &RetentionPolicy, now_ms: i64, batch_size: usize) -> Result<usize> {
        let glob = &policy.category_glob;
        let tx = self.conn_mut().transaction()?;

        let deleted = match policy.kind {
            PolicyKind::ByAge => {
                let cutoff = now_ms - (policy.parameter as i64) * 86_400_000;
                tx.execute(
                    "DELETE FROM events WHERE id IN (
                         SELECT id FROM events
                         WHERE ts_ms < ?1 AND category GLOB ?2
                         ORDER BY ts_ms ASC LIMIT ?3
                     )",
                    rusqlite::params![cutoff, glob, batch_size as i64],
                )?
            }
            PolicyKind::ByCount => {
                let keep = policy.parameter as i64;
                let total: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM events WHERE category GLOB ?1",
                    [glob],
                    |row| row.get(0),
                )?;
                let excess = (total - keep).max(0);
                if excess == 0 {
                    0
                } else {
                    tx.execute(
                        "DELETE FROM events WHERE id IN (
                             SELECT id FROM events WHERE category GLOB ?1
                             ORDER BY ts_ms ASC, id ASC LIMIT ?2
                         )",
                        rusqlite::params![glob, excess.min(batch_size as i64)],
                    )?
                }
            }
            PolicyKind::BySize => {
                // Size policies ignore the glob: file size is global
                let max_bytes = (policy.parameter as i64) * 1024 * 1024;
                let page_count: i64 = tx.query_row("PRAGMA page_count", [], |r| r.get(0))?;
                let page_size: i64 = tx.query_row("PRAGMA page_size", [], |r| r.get(0))?;
                if page_count * page_size <= max_bytes {
                    0
                } else {
                    tx.execute(
                        "DELETE FROM events WHERE id IN (
                             SELECT id FROM events ORDER BY ts_ms ASC, id ASC LIMIT ?1
                         )",
                        [batch_size as i64],
                    )?
                }
            }
        };

        tx.commit()?;
        Ok(deleted)
    }
}
