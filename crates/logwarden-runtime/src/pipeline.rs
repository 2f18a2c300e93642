use logwarden_protocols::normalize_frame;
use logwarden_types::RawFrame;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::enricher::Enricher;
use crate::metrics::IngestMetrics;
use crate::queue::IngestQueue;
use crate::shutdown::Shutdown;

/// Frame channel depth between listeners and the normalizer workers.
pub const FRAME_CHANNEL_CAPACITY: usize = 8192;

/// Normalizer + enricher worker: drains framed payloads, maps them to
/// canonical events and pushes them onto the ingest queue. Undecodable
/// frames are dropped and counted per `(protocol, reason)`.
pub async fn run_normalizer(
    mut frames: mpsc::Receiver<RawFrame>,
    queue: Arc<IngestQueue>,
    enricher: Arc<Enricher>,
    metrics: Arc<IngestMetrics>,
    mut shutdown: Shutdown,
) {
    loop {
        let frame = tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
            _ = shutdown.wait() => return,
        };

        let counters = metrics.protocol(frame.proto);
        counters.frames_total.fetch_add(1, Ordering::Relaxed);
        counters
            .bytes_total
            .fetch_add(frame.payload.len() as u64, Ordering::Relaxed);

        match normalize_frame(&frame) {
            Ok(events) => {
                counters
                    .events_total
                    .fetch_add(events.len() as u64, Ordering::Relaxed);
                for mut event in events {
                    enricher.enrich(&mut event).await;
                    // Backpressure is expressed by the queue's drop policy,
                    // never by blocking the listener side
                    queue.push(event);
                }
            }
            Err(err) => {
                trace!(proto = %frame.proto, reason = err.reason(), "dropped malformed frame");
                counters.count_malformed(err.reason());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enricher::GeoTable;
    use crate::queue::IngestQueue;
    use logwarden_types::Protocol;

    fn setup() -> (
        mpsc::Sender<RawFrame>,
        Arc<IngestQueue>,
        Arc<IngestMetrics>,
        crate::shutdown::ShutdownHandle,
        tokio::task::JoinHandle<()>,
    ) {
        let metrics = Arc::new(IngestMetrics::default());
        let queue = Arc::new(IngestQueue::new(1000, metrics.clone()));
        let enricher = Arc::new(Enricher::new(GeoTable::empty(), false));
        let (tx, rx) = mpsc::channel(64);
        let (handle, shutdown) = Shutdown::new();
        let worker = tokio::spawn(run_normalizer(
            rx,
            queue.clone(),
            enricher,
            metrics.clone(),
            shutdown,
        ));
        (tx, queue, metrics, handle, worker)
    }

    #[tokio::test]
    async fn frames_become_queued_events() {
        let (tx, queue, metrics, handle, worker) = setup();

        let body = serde_json::to_vec(&serde_json::json!({"message": "hi", "level": "warn"})).unwrap();
        tx.send(RawFrame::new(
            Protocol::Http,
            body,
            Some("192.0.2.1:1000".parse().unwrap()),
        ))
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(
            metrics.http.events_total.load(Ordering::Relaxed),
            1
        );

        handle.trigger();
        let _ = worker.await;
    }

    #[tokio::test]
    async fn malformed_frames_counted_not_fatal() {
        let (tx, queue, metrics, handle, worker) = setup();

        tx.send(RawFrame::new(
            Protocol::Http,
            b"not json".to_vec(),
            Some("192.0.2.1:1000".parse().unwrap()),
        ))
        .await
        .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(queue.len(), 0);
        let malformed = metrics.http.malformed.lock().unwrap().clone();
        assert_eq!(malformed.get("bad_json"), Some(&1));

        handle.trigger();
        let _ = worker.await;
    }
}
