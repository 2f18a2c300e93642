use chrono::{Local, Utc};
use logwarden_store::Database;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::config::{Config, Schedule};
use crate::hub::StreamHub;
use crate::shutdown::Shutdown;

/// Eviction transaction size; bounds writer-lock hold time.
const EVICTION_BATCH: usize = 10_000;

/// Evictions above this row count trigger store compaction.
const COMPACTION_THRESHOLD: u64 = 1_000_000;

/// Newest backups kept; older ones are deleted after a successful snapshot.
const BACKUPS_KEPT: usize = 10;

/// Scheduled eviction, backup rotation and compaction.
pub struct RetentionEngine {
    db: Arc<Mutex<Database>>,
    config: Arc<Config>,
    hub: Arc<StreamHub>,
    schedule: Schedule,
}

impl RetentionEngine {
    pub fn new(db: Arc<Mutex<Database>>, config: Arc<Config>, hub: Arc<StreamHub>) -> crate::Result<Self> {
        let schedule = Schedule::parse(&config.backup_schedule)?;
        Ok(Self {
            db,
            config,
            hub,
            schedule,
        })
    }

    pub async fn run(&self, mut shutdown: Shutdown) {
        loop {
            let next = self.schedule.next_after(Local::now());
            let wait = (next - Local::now())
                .to_std()
                .unwrap_or_else(|_| std::time::Duration::from_secs(60));
            info!(at = %next, "next retention pass scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.wait() => return,
            }

            self.run_once();
        }
    }

    /// One full pass: eviction per policy union, then backup + rotation,
    /// then compaction when the eviction was large. Each part fails
    /// independently; eviction failures simply retry next tick.
    pub fn run_once(&self) {
        let deleted = self.evict();
        self.backup();
        if deleted > COMPACTION_THRESHOLD {
            info!(rows = deleted, "large eviction, compacting store");
            let db = self.db.lock().unwrap();
            if let Err(err) = db.vacuum() {
                warn!(error = %err, "compaction failed");
            }
        }
    }

    fn evict(&self) -> u64 {
        let now_ms = Utc::now().timestamp_millis();
        let mut total = 0u64;

        for policy in self.config.effective_retention_policies() {
            let result = {
                let mut db = self.db.lock().unwrap();
                db.evict_by_policy(&policy, now_ms, EVICTION_BATCH)
            };
            match result {
                Ok(stats) => {
                    if stats.rows_deleted > 0 {
                        info!(
                            kind = ?policy.kind,
                            rows = stats.rows_deleted,
                            batches = stats.batches,
                            "retention eviction"
                        );
                    }
                    total += stats.rows_deleted;
                }
                Err(err) => {
                    // Retried on the next scheduled tick
                    warn!(error = %err, kind = ?policy.kind, "eviction failed");
                }
            }
        }
        total
    }

    fn backup(&self) {
        let name = format!(
            "enterprise_logs_{}.db",
            Utc::now().format("%Y-%m-%d_%H-%M-%S")
        );
        let dest = self.config.backups_dir().join(&name);

        let result = {
            let db = self.db.lock().unwrap();
            db.backup_to(&dest)
        };

        match result {
            Ok(()) => {
                info!(file = %dest.display(), "backup created");
                self.prune_backups();
            }
            Err(err) => {
                error!(error = %err, "backup failed");
                let data = serde_json::json!({ "error": err.to_string(), "file": name });
                if let Ok(mut db) = self.db.lock() {
                    let _ = db.record_ops_event("backup_failed", &data);
                }
                self.hub.publish("alerts", "backup_failed", data);
            }
        }
    }

    /// Keep the newest `BACKUPS_KEPT` snapshot files; the timestamped names
    /// sort chronologically.
    fn prune_backups(&self) {
        let mut backups: Vec<PathBuf> = match std::fs::read_dir(self.config.backups_dir()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("enterprise_logs_") && n.ends_with(".db"))
                })
                .collect(),
            Err(_) => return,
        };

        backups.sort();
        while backups.len() > BACKUPS_KEPT {
            let oldest = backups.remove(0);
            if let Err(err) = std::fs::remove_file(&oldest) {
                warn!(file = %oldest.display(), error = %err, "backup prune failed");
            } else {
                info!(file = %oldest.display(), "old backup removed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::IngestMetrics;
    use chrono::Duration;
    use logwarden_types::{LogEvent, LogLevel};

    fn engine_with(data_dir: &std::path::Path, retention_days: u64) -> (RetentionEngine, Arc<Mutex<Database>>) {
        let mut config: Config = toml::from_str("").unwrap();
        config.data_dir = data_dir.to_path_buf();
        config.log_retention_days = retention_days;

        let db = Arc::new(Mutex::new(
            Database::open(&config.databases_dir().join("logwarden.db")).unwrap(),
        ));
        let hub = Arc::new(StreamHub::new(Arc::new(IngestMetrics::default())));
        let engine = RetentionEngine::new(db.clone(), Arc::new(config), hub).unwrap();
        (engine, db)
    }

    fn aged_event(days_ago: i64) -> LogEvent {
        let ts = Utc::now() - Duration::days(days_ago);
        LogEvent::new(ts, ts, LogLevel::Info, "s", "app", "m")
    }

    #[test]
    fn pass_evicts_old_and_creates_backup() {
        let dir = tempfile::TempDir::new().unwrap();
        let (engine, db) = engine_with(dir.path(), 1);

        let mut batch = vec![aged_event(2), aged_event(0)];
        db.lock().unwrap().insert_batch(&mut batch).unwrap();

        engine.run_once();

        assert_eq!(db.lock().unwrap().count_all_events().unwrap(), 1);
        let backups: Vec<_> = std::fs::read_dir(dir.path().join("backups"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(backups.len(), 1);
        assert!(backups[0]
            .file_name()
            .to_string_lossy()
            .starts_with("enterprise_logs_"));
    }

    #[test]
    fn old_backups_are_pruned_to_ten() {
        let dir = tempfile::TempDir::new().unwrap();
        let (engine, _db) = engine_with(dir.path(), 1);

        let backups_dir = dir.path().join("backups");
        std::fs::create_dir_all(&backups_dir).unwrap();
        for i in 0..12 {
            std::fs::write(
                backups_dir.join(format!("enterprise_logs_2020-01-{:02}_00-00-00.db", i + 1)),
                b"old",
            )
            .unwrap();
        }

        engine.run_once();

        let mut names: Vec<String> = std::fs::read_dir(&backups_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names.len(), BACKUPS_KEPT);
        // The seeded 2020 files are oldest; the three earliest are gone
        assert!(!names.contains(&"enterprise_logs_2020-01-01_00-00-00.db".to_string()));
        assert!(names.last().unwrap() > &"enterprise_logs_2021".to_string());
    }
}
