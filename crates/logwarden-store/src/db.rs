use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::migrations::{applied_versions, run_migrations};
use crate::{Error, Result};

// NOTE: Storage Design Rationale
//
// Why SQLite (single writer, WAL)?
// - The pipeline has exactly one writing task (batch writer + retry worker
//   share it); WAL keeps readers non-blocking during write transactions
// - Ingest is append-heavy; AUTOINCREMENT rowids give per-writer monotonic
//   ids without coordination
// - Backup is a file copy via the online backup API, which retention uses
//
// Why FTS5 with external content?
// - Message text is searched both by token and by regex; the FTS index
//   serves token queries and prefilters regex candidates without storing
//   the message twice
//
// Why millisecond INTEGER timestamps?
// - Matches the event model's resolution, sorts correctly, and keeps the
//   covering indexes compact compared to RFC 3339 strings

/// Handle over one SQLite database file.
///
/// Not `Sync`: callers share it behind a lock, and only the write-side
/// tasks ever open transactions.
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Migration(format!("create {}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(db_path)?;
        let mut db = Self {
            conn,
            path: Some(db_path.to_path_buf()),
        };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn, path: None };
        db.init()?;
        Ok(db)
    }

    fn init(&mut self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&mut self.conn)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Versions recorded in `schema_migrations`, ascending.
    pub fn migration_versions(&self) -> Result<Vec<i32>> {
        applied_versions(&self.conn)
    }

    /// Total bytes of the main database file (page_count × page_size).
    pub fn size_bytes(&self) -> Result<i64> {
        let page_count: i64 = self.conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
        let page_size: i64 = self.conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
        Ok(page_count * page_size)
    }

    /// Reclaim space after large evictions.
    pub fn vacuum(&self) -> Result<()> {
        self.conn.execute("VACUUM", [])?;
        Ok(())
    }

    /// Snapshot the live database to `dest` with the online backup API,
    /// then verify the copy opens and carries the full migration set.
    pub fn backup_to(&self, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Backup(format!("create {}: {}", parent.display(), e)))?;
        }

        {
            let mut dst = Connection::open(dest)?;
            let backup = rusqlite::backup::Backup::new(&self.conn, &mut dst)?;
            backup
                .run_to_completion(256, Duration::from_millis(10), None)
                .map_err(|e| Error::Backup(e.to_string()))?;
        }

        // Verification: the copy must open and report the same schema
        let copy = Database::open(dest)?;
        let versions = copy.migration_versions()?;
        if versions.last().copied() != Some(crate::SCHEMA_VERSION) {
            return Err(Error::Backup(format!(
                "verification failed: copy at migration {:?}",
                versions.last()
            )));
        }
        Ok(())
    }
}
