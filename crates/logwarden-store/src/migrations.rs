use chrono::Utc;
use rusqlite::{Connection, Transaction};

use crate::{Error, Result};

/// Highest numbered migration; `schema_migrations` records what applied.
pub const SCHEMA_VERSION: i32 = 5;

type Step = fn(&Transaction) -> Result<()>;

/// Ordered migration set. Each step runs in its own transaction and must be
/// idempotent: it introspects before touching anything, so interrupted or
/// pre-seeded stores converge to the same schema.
const MIGRATIONS: [(i32, &str, Step); 5] = [
    (1, "events core", migrate_events_core),
    (2, "identity and settings", migrate_identity),
    (3, "saved searches and alerting", migrate_saved_and_alerts),
    (4, "retry queue and ops events", migrate_retry_and_ops),
    (5, "failed batch quarantine flag", migrate_quarantine_flag),
];

pub(crate) fn run_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;

    for (version, name, step) in MIGRATIONS {
        let applied: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM schema_migrations WHERE version = ?1)",
            [version],
            |row| row.get(0),
        )?;
        if applied {
            continue;
        }

        let tx = conn.transaction()?;
        step(&tx).map_err(|e| Error::Migration(format!("step {} ({}): {}", version, name, e)))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![version, name, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
    }

    Ok(())
}

pub(crate) fn applied_versions(conn: &Connection) -> Result<Vec<i32>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(versions)
}

fn table_exists(tx: &Transaction, name: &str) -> Result<bool> {
    let exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1)",
        [name],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn column_exists(tx: &Transaction, table: &str, column: &str) -> Result<bool> {
    let mut stmt = tx.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn migrate_events_core(tx: &Transaction) -> Result<()> {
    if !table_exists(tx, "events")? {
        tx.execute_batch(
            r#"
            CREATE TABLE events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts_ms INTEGER NOT NULL,
                ingest_ms INTEGER NOT NULL,
                level TEXT NOT NULL,
                source TEXT NOT NULL,
                category TEXT NOT NULL,
                message TEXT NOT NULL,
                host TEXT,
                peer_ip TEXT,
                geo TEXT,
                user_agent TEXT,
                tags TEXT,
                metadata TEXT,
                dedup_key TEXT,
                dedup_minute INTEGER
            );

            CREATE INDEX idx_events_ts ON events(ts_ms DESC);
            CREATE INDEX idx_events_level_ts ON events(level, ts_ms);
            CREATE INDEX idx_events_source_ts ON events(source, ts_ms);
            CREATE INDEX idx_events_category ON events(category);
            CREATE UNIQUE INDEX idx_events_dedup
                ON events(dedup_key, dedup_minute)
                WHERE dedup_key IS NOT NULL;
            "#,
        )?;
    }

    if !table_exists(tx, "events_fts")? {
        tx.execute_batch(
            r#"
            CREATE VIRTUAL TABLE events_fts USING fts5(
                message,
                content='events',
                content_rowid='id'
            );

            CREATE TRIGGER events_fts_ai AFTER INSERT ON events BEGIN
                INSERT INTO events_fts(rowid, message) VALUES (new.id, new.message);
            END;

            CREATE TRIGGER events_fts_ad AFTER DELETE ON events BEGIN
                INSERT INTO events_fts(events_fts, rowid, message)
                    VALUES ('delete', old.id, old.message);
            END;
            "#,
        )?;
    }

    Ok(())
}

fn migrate_identity(tx: &Transaction) -> Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            value_type TEXT NOT NULL DEFAULT 'string',
            updated_at_ms INTEGER NOT NULL,
            updated_by TEXT NOT NULL DEFAULT 'system'
        );

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'viewer',
            created_at_ms INTEGER NOT NULL,
            last_login_at_ms INTEGER
        );

        CREATE TABLE IF NOT EXISTS auth_sessions (
            token_hash TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            created_at_ms INTEGER NOT NULL,
            expires_at_ms INTEGER NOT NULL,
            last_seen_at_ms INTEGER NOT NULL,
            ip TEXT,
            FOREIGN KEY (user_id) REFERENCES users(id)
        );

        CREATE TABLE IF NOT EXISTS api_keys (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key_hash TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            user_id INTEGER NOT NULL,
            created_at_ms INTEGER NOT NULL,
            last_used_at_ms INTEGER,
            FOREIGN KEY (user_id) REFERENCES users(id)
        );

        CREATE TABLE IF NOT EXISTS audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            at_ms INTEGER NOT NULL,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            resource TEXT NOT NULL,
            ip TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_audit_at ON audit_log(at_ms DESC);
        CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON auth_sessions(expires_at_ms);
        "#,
    )?;
    Ok(())
}

fn migrate_saved_and_alerts(tx: &Transaction) -> Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS saved_searches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            filter_spec TEXT NOT NULL,
            visibility TEXT NOT NULL DEFAULT 'private',
            created_at_ms INTEGER NOT NULL,
            last_used_at_ms INTEGER,
            use_count INTEGER NOT NULL DEFAULT 0,
            UNIQUE (owner, name)
        );

        CREATE TABLE IF NOT EXISTS alert_rules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            query TEXT NOT NULL,
            window_seconds INTEGER NOT NULL,
            threshold INTEGER NOT NULL,
            comparator TEXT NOT NULL DEFAULT '>=',
            severity TEXT NOT NULL DEFAULT 'warn',
            cooldown_seconds INTEGER NOT NULL DEFAULT 300,
            enabled INTEGER NOT NULL DEFAULT 1,
            last_fired_at_ms INTEGER
        );

        CREATE TABLE IF NOT EXISTS alert_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            rule_id INTEGER NOT NULL,
            fired_at_ms INTEGER NOT NULL,
            window_start_ms INTEGER NOT NULL,
            window_end_ms INTEGER NOT NULL,
            matched_count INTEGER NOT NULL,
            severity TEXT NOT NULL,
            FOREIGN KEY (rule_id) REFERENCES alert_rules(id)
        );

        CREATE INDEX IF NOT EXISTS idx_alert_history_rule
            ON alert_history(rule_id, fired_at_ms DESC);
        "#,
    )?;
    Ok(())
}

fn migrate_retry_and_ops(tx: &Transaction) -> Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS failed_batches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            payload_blob BLOB NOT NULL,
            first_failed_at_ms INTEGER NOT NULL,
            last_attempt_at_ms INTEGER NOT NULL,
            attempt INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS ops_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            at_ms INTEGER NOT NULL,
            kind TEXT NOT NULL,
            data TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_ops_events_at ON ops_events(at_ms DESC);
        "#,
    )?;
    Ok(())
}

fn migrate_quarantine_flag(tx: &Transaction) -> Result<()> {
    if !column_exists(tx, "failed_batches", "quarantined")? {
        tx.execute_batch(
            "ALTER TABLE failed_batches ADD COLUMN quarantined INTEGER NOT NULL DEFAULT 0;",
        )?;
    }
    Ok(())
}
