use logwarden_types::{LogEvent, LogLevel};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::metrics::IngestMetrics;

pub const QUEUE_CAPACITY: usize = 50_000;

/// Level-aware bounded ingest queue.
///
/// Multi-producer (listeners), single-consumer (batch writer). Pushes never
/// block: at capacity the lowest-level event currently queued is displaced,
/// or the incoming event is dropped when nothing queued ranks lower.
///
/// Internally one deque per level plus a global arrival sequence, so the
/// consumer pops in arrival order while the drop policy stays O(1).
pub struct IngestQueue {
    inner: Mutex<Lanes>,
    notify: Notify,
    capacity: usize,
    metrics: Arc<IngestMetrics>,
}

struct Lanes {
    /// One FIFO lane per level rank, entries stamped with an arrival seq
    lanes: [VecDeque<(u64, LogEvent)>; 5],
    len: usize,
    next_seq: u64,
}

impl IngestQueue {
    pub fn new(capacity: usize, metrics: Arc<IngestMetrics>) -> Self {
        Self {
            inner: Mutex::new(Lanes {
                lanes: Default::default(),
                len: 0,
                next_seq: 0,
            }),
            notify: Notify::new(),
            capacity,
            metrics,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-blocking push with the level-aware drop policy. Returns false
    /// when the incoming event itself was dropped.
    pub fn push(&self, event: LogEvent) -> bool {
        let mut inner = self.inner.lock().unwrap();

        if inner.len >= self.capacity {
            // Displace the oldest event of the lowest level present, unless
            // the incoming event ranks no higher than it
            let lowest = (0..5).find(|&rank| !inner.lanes[rank].is_empty());
            match lowest {
                Some(rank) if (event.level.rank() as usize) > rank => {
                    inner.lanes[rank].pop_front();
                    inner.len -= 1;
                    self.metrics.count_drop(level_of_rank(rank));
                }
                _ => {
                    self.metrics.count_drop(event.level);
                    return false;
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let rank = event.level.rank() as usize;
        inner.lanes[rank].push_back((seq, event));
        inner.len += 1;
        self.metrics
            .queue_depth
            .store(inner.len as i64, Ordering::Relaxed);
        drop(inner);

        self.notify.notify_one();
        true
    }

    /// Pop up to `max` events in arrival order; non-blocking.
    pub fn pop_batch(&self, max: usize) -> Vec<LogEvent> {
        let mut inner = self.inner.lock().unwrap();
        let mut batch = Vec::new();

        while batch.len() < max && inner.len > 0 {
            // Earliest arrival across the five lane fronts
            let rank = (0..5)
                .filter_map(|r| inner.lanes[r].front().map(|(seq, _)| (*seq, r)))
                .min()
                .map(|(_, r)| r)
                .expect("len > 0 implies a non-empty lane");
            let (_, event) = inner.lanes[rank].pop_front().expect("front checked");
            inner.len -= 1;
            batch.push(event);
        }

        self.metrics
            .queue_depth
            .store(inner.len as i64, Ordering::Relaxed);
        batch
    }

    /// Wait until at least one event may be available.
    pub async fn wait(&self) {
        if !self.is_empty() {
            return;
        }
        self.notify.notified().await;
    }

    /// Wake the consumer without data (used by shutdown).
    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

fn level_of_rank(rank: usize) -> LogLevel {
    LogLevel::ALL[rank]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(level: LogLevel, message: &str) -> LogEvent {
        let now = Utc::now();
        LogEvent::new(now, now, level, "s", "app", message)
    }

    fn queue(capacity: usize) -> IngestQueue {
        IngestQueue::new(capacity, Arc::new(IngestMetrics::default()))
    }

    #[test]
    fn fifo_across_levels() {
        let q = queue(10);
        q.push(event(LogLevel::Error, "first"));
        q.push(event(LogLevel::Debug, "second"));
        q.push(event(LogLevel::Critical, "third"));

        let batch = q.pop_batch(10);
        let messages: Vec<_> = batch.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
    }

    #[test]
    fn overflow_displaces_lowest_level() {
        let q = queue(2);
        q.push(event(LogLevel::Debug, "d"));
        q.push(event(LogLevel::Info, "i"));

        // Error displaces the debug event
        assert!(q.push(event(LogLevel::Error, "e")));
        let messages: Vec<_> = q.pop_batch(10).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["i", "e"]);
    }

    #[test]
    fn overflow_drops_incoming_when_nothing_lower() {
        let q = queue(2);
        q.push(event(LogLevel::Critical, "a"));
        q.push(event(LogLevel::Critical, "b"));

        assert!(!q.push(event(LogLevel::Critical, "c")));
        assert!(!q.push(event(LogLevel::Debug, "d")));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn drop_counters_maintained() {
        let metrics = Arc::new(IngestMetrics::default());
        let q = IngestQueue::new(1, metrics.clone());
        q.push(event(LogLevel::Debug, "d"));
        q.push(event(LogLevel::Error, "e")); // displaces debug

        assert_eq!(
            metrics.drops_by_level[LogLevel::Debug.rank() as usize].load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn pop_batch_respects_max() {
        let q = queue(10);
        for i in 0..5 {
            q.push(event(LogLevel::Info, &format!("m{}", i)));
        }
        assert_eq!(q.pop_batch(3).len(), 3);
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn wait_returns_when_data_arrives() {
        let q = Arc::new(queue(10));
        let q2 = q.clone();
        let waiter = tokio::spawn(async move {
            q2.wait().await;
            q2.pop_batch(1).len()
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        q.push(event(LogLevel::Info, "x"));
        assert_eq!(waiter.await.unwrap(), 1);
    }
}
