use logwarden_store::Database;
use logwarden_types::LogEvent;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::metrics::IngestMetrics;
use crate::queue::IngestQueue;
use crate::shutdown::Shutdown;

pub const MAX_BATCH: usize = 500;
pub const MAX_WAIT_MS: u64 = 100;

/// Queue drain budget during shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Events that became durable, fanned out post-commit to the stream hub and
/// the rule engine. Subscribers register at startup; there is no mutable
/// emitter to attach to later.
pub type PostCommit = Arc<Vec<LogEvent>>;

pub struct BatchWriter {
    queue: Arc<IngestQueue>,
    db: Arc<Mutex<Database>>,
    post_commit: broadcast::Sender<PostCommit>,
    metrics: Arc<IngestMetrics>,
}

impl BatchWriter {
    pub fn new(
        queue: Arc<IngestQueue>,
        db: Arc<Mutex<Database>>,
        post_commit: broadcast::Sender<PostCommit>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            queue,
            db,
            post_commit,
            metrics,
        }
    }

    /// Single consumer of the ingest queue. Coalesces up to `MAX_BATCH`
    /// events or `MAX_WAIT_MS`, whichever fills first, and writes each
    /// batch in one transaction.
    pub async fn run(self, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = self.queue.wait() => {}
                _ = shutdown.wait() => break,
            }

            let batch = self.coalesce().await;
            if !batch.is_empty() {
                self.write_batch(batch);
            }
        }

        self.drain().await;
    }

    /// Gather a batch: whatever is queued now, topped up until the size or
    /// time bound is hit.
    async fn coalesce(&self) -> Vec<LogEvent> {
        let mut batch = self.queue.pop_batch(MAX_BATCH);
        if batch.len() >= MAX_BATCH {
            return batch;
        }

        let deadline = Instant::now() + Duration::from_millis(MAX_WAIT_MS);
        while batch.len() < MAX_BATCH {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                _ = self.queue.wait() => {
                    batch.extend(self.queue.pop_batch(MAX_BATCH - batch.len()));
                }
                _ = tokio::time::sleep(remaining) => break,
            }
        }
        batch
    }

    /// One transaction per batch. Success acks the batch into the
    /// post-commit fan-out; failure parks the whole batch, events intact,
    /// in the retry queue before anything else is processed.
    fn write_batch(&self, mut batch: Vec<LogEvent>) {
        let started = Instant::now();
        let outcome = {
            let mut db = self.db.lock().unwrap();
            db.insert_batch(&mut batch)
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        self.metrics
            .write_latency_ms_last
            .store(latency_ms, Ordering::Relaxed);

        match outcome {
            Ok(outcome) => {
                self.metrics.batches_written.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .events_written
                    .fetch_add(outcome.inserted as u64, Ordering::Relaxed);
                self.metrics
                    .dedup_discarded
                    .fetch_add(outcome.deduped as u64, Ordering::Relaxed);

                // Only rows that actually persisted become visible
                let committed: Vec<LogEvent> =
                    batch.into_iter().filter(|e| e.id.is_some()).collect();
                if !committed.is_empty() {
                    let _ = self.post_commit.send(Arc::new(committed));
                }
            }
            Err(err) => {
                error!(error = %err, events = batch.len(), "batch write failed, parking for retry");
                self.metrics.batches_failed.fetch_add(1, Ordering::Relaxed);
                self.park_failed(&batch);
            }
        }
    }

    fn park_failed(&self, batch: &[LogEvent]) {
        let payload = match serde_json::to_vec(batch) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "failed batch could not be serialized; events lost");
                return;
            }
        };
        let mut db = self.db.lock().unwrap();
        if let Err(err) = db.enqueue_failed_batch(&payload) {
            error!(error = %err, "retry queue unavailable; events lost");
        }
    }

    /// Shutdown path: drain the queue for up to ten seconds, then flush
    /// whatever was gathered.
    async fn drain(&self) {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        info!("draining ingest queue");
        while Instant::now() < deadline {
            let batch = self.queue.pop_batch(MAX_BATCH);
            if batch.is_empty() {
                break;
            }
            self.write_batch(batch);
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use logwarden_types::LogLevel;

    fn event(message: &str) -> LogEvent {
        let now = Utc::now();
        LogEvent::new(now, now, LogLevel::Info, "s", "app", message)
    }

    #[tokio::test]
    async fn events_flow_to_store_and_fanout() {
        let metrics = Arc::new(IngestMetrics::default());
        let queue = Arc::new(IngestQueue::new(1000, metrics.clone()));
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let (tx, mut rx) = broadcast::channel(16);
        let writer = BatchWriter::new(queue.clone(), db.clone(), tx, metrics.clone());
        let (handle, shutdown) = Shutdown::new();
        let task = tokio::spawn(writer.run(shutdown));

        queue.push(event("one"));
        queue.push(event("two"));

        let committed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("post-commit within deadline")
            .unwrap();
        assert_eq!(committed.len(), 2);
        assert!(committed.iter().all(|e| e.id.is_some()));
        assert_eq!(db.lock().unwrap().count_all_events().unwrap(), 2);

        handle.trigger();
        queue.wake();
        let _ = task.await;
    }

    #[tokio::test]
    async fn shutdown_flushes_remaining_events() {
        let metrics = Arc::new(IngestMetrics::default());
        let queue = Arc::new(IngestQueue::new(1000, metrics.clone()));
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let (tx, _rx) = broadcast::channel(16);
        let writer = BatchWriter::new(queue.clone(), db.clone(), tx, metrics);
        let (handle, shutdown) = Shutdown::new();

        // Trigger shutdown first; events pushed before run() starts must
        // still land via the drain path
        queue.push(event("straggler"));
        handle.trigger();
        writer.run(shutdown).await;

        assert_eq!(db.lock().unwrap().count_all_events().unwrap(), 1);
    }
}
