use chrono::Utc;
use logwarden_store::Database;
use logwarden_types::LogEvent;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::hub::StreamHub;
use crate::metrics::IngestMetrics;
use crate::shutdown::Shutdown;
use crate::writer::PostCommit;

const POLL_INTERVAL: Duration = Duration::from_secs(30);
const REPLAY_LIMIT: usize = 50;
const MAX_ATTEMPTS: u32 = 10;

/// Background replayer for the persistent retry queue.
///
/// Every 30 s, up to 50 parked batches whose backoff has elapsed are
/// replayed through the store. A batch that reaches attempt 10 is
/// quarantined and an operational alert goes out on the `alerts` channel.
pub struct RetryWorker {
    db: Arc<Mutex<Database>>,
    post_commit: broadcast::Sender<PostCommit>,
    hub: Arc<StreamHub>,
    metrics: Arc<IngestMetrics>,
}

impl RetryWorker {
    pub fn new(
        db: Arc<Mutex<Database>>,
        post_commit: broadcast::Sender<PostCommit>,
        hub: Arc<StreamHub>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            db,
            post_commit,
            hub,
            metrics,
        }
    }

    pub async fn run(&self, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = shutdown.wait() => return,
            }
            self.replay_due();
        }
    }

    pub fn replay_due(&self) {
        self.replay_due_at(Utc::now().timestamp_millis());
    }

    fn replay_due_at(&self, now_ms: i64) {
        let due = {
            let db = self.db.lock().unwrap();
            match db.due_failed_batches(now_ms, REPLAY_LIMIT, MAX_ATTEMPTS) {
                Ok(due) => due,
                Err(err) => {
                    warn!(error = %err, "retry queue poll failed");
                    return;
                }
            }
        };

        for record in due {
            let mut events: Vec<LogEvent> = match serde_json::from_slice(&record.payload_blob) {
                Ok(events) => events,
                Err(err) => {
                    warn!(batch = record.id, error = %err, "unreadable failed batch, quarantining");
                    self.quarantine(record.id, record.attempt, "payload_unreadable");
                    continue;
                }
            };

            let outcome = {
                let mut db = self.db.lock().unwrap();
                db.insert_batch(&mut events)
            };

            match outcome {
                Ok(_) => {
                    info!(batch = record.id, attempt = record.attempt, "failed batch replayed");
                    let mut db = self.db.lock().unwrap();
                    let _ = db.delete_failed_batch(record.id);
                    drop(db);
                    let committed: Vec<LogEvent> =
                        events.into_iter().filter(|e| e.id.is_some()).collect();
                    if !committed.is_empty() {
                        let _ = self.post_commit.send(Arc::new(committed));
                    }
                }
                Err(err) => {
                    let attempt = {
                        let mut db = self.db.lock().unwrap();
                        db.bump_failed_batch(record.id).unwrap_or(record.attempt + 1)
                    };
                    warn!(batch = record.id, attempt, error = %err, "replay failed");
                    if attempt >= MAX_ATTEMPTS {
                        self.quarantine(record.id, attempt, "max_attempts");
                    }
                }
            }
        }
    }

    fn quarantine(&self, batch_id: i64, attempt: u32, reason: &str) {
        self.metrics
            .batches_quarantined
            .fetch_add(1, Ordering::Relaxed);
        let data = serde_json::json!({
            "batch_id": batch_id,
            "attempt": attempt,
            "reason": reason,
        });
        {
            let mut db = self.db.lock().unwrap();
            let _ = db.quarantine_failed_batch(batch_id);
            let _ = db.record_ops_event("batch_quarantined", &data);
        }
        self.hub.publish("alerts", "batch_quarantined", data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use logwarden_types::LogLevel;

    fn worker(db: Arc<Mutex<Database>>) -> RetryWorker {
        let (tx, _rx) = broadcast::channel(16);
        RetryWorker::new(
            db,
            tx,
            Arc::new(StreamHub::new(Arc::new(IngestMetrics::default()))),
            Arc::new(IngestMetrics::default()),
        )
    }

    fn parked_batch(db: &Arc<Mutex<Database>>, messages: &[&str]) -> i64 {
        let now = Utc::now();
        let events: Vec<LogEvent> = messages
            .iter()
            .map(|m| LogEvent::new(now, now, LogLevel::Error, "s", "app", *m))
            .collect();
        let payload = serde_json::to_vec(&events).unwrap();
        db.lock().unwrap().enqueue_failed_batch(&payload).unwrap()
    }

    /// An instant far past every backoff, making parked batches due.
    fn far_future() -> i64 {
        Utc::now().timestamp_millis() + 2 * 3_600_000
    }

    #[tokio::test]
    async fn due_batch_replays_into_store() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        parked_batch(&db, &["a", "b"]);

        worker(db.clone()).replay_due_at(far_future());

        assert_eq!(db.lock().unwrap().count_all_events().unwrap(), 2);
        assert_eq!(db.lock().unwrap().failed_batch_counts().unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn not_yet_due_batch_is_left_alone() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        parked_batch(&db, &["a"]);

        worker(db.clone()).replay_due();

        assert_eq!(db.lock().unwrap().count_all_events().unwrap(), 0);
        assert_eq!(db.lock().unwrap().failed_batch_counts().unwrap(), (1, 0));
    }

    #[tokio::test]
    async fn unreadable_batch_is_quarantined() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        db.lock().unwrap().enqueue_failed_batch(b"garbage").unwrap();

        worker(db.clone()).replay_due_at(far_future());

        assert_eq!(db.lock().unwrap().failed_batch_counts().unwrap(), (0, 1));
        let events = db.lock().unwrap().recent_ops_events(5).unwrap();
        assert!(events.iter().any(|e| e.kind == "batch_quarantined"));
    }
}
