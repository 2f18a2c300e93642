use logwarden_types::{LogLevel, Protocol};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

/// Counters for one protocol listener.
#[derive(Debug, Default)]
pub struct ProtocolCounters {
    pub frames_total: AtomicU64,
    pub events_total: AtomicU64,
    pub bytes_total: AtomicU64,
    /// Malformed frames by stable reason key
    pub malformed: Mutex<HashMap<&'static str, u64>>,
}

impl ProtocolCounters {
    pub fn count_malformed(&self, reason: &'static str) {
        let mut map = self.malformed.lock().unwrap();
        *map.entry(reason).or_insert(0) += 1;
    }

    fn snapshot(&self) -> serde_json::Value {
        let malformed: HashMap<&'static str, u64> =
            self.malformed.lock().unwrap().clone();
        json!({
            "frames": self.frames_total.load(Ordering::Relaxed),
            "events": self.events_total.load(Ordering::Relaxed),
            "bytes": self.bytes_total.load(Ordering::Relaxed),
            "malformed": malformed,
        })
    }
}

/// Shared pipeline metrics, surfaced at `/api/ingestion/status`.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    pub syslog_udp: ProtocolCounters,
    pub syslog_tcp: ProtocolCounters,
    pub gelf_udp: ProtocolCounters,
    pub gelf_tcp: ProtocolCounters,
    pub beats: ProtocolCounters,
    pub fluent: ProtocolCounters,
    pub http: ProtocolCounters,
    pub file_tail: ProtocolCounters,

    pub queue_depth: AtomicI64,
    pub drops_by_level: [AtomicU64; 5],
    pub dedup_discarded: AtomicU64,

    pub batches_written: AtomicU64,
    pub batches_failed: AtomicU64,
    pub batches_quarantined: AtomicU64,
    pub write_latency_ms_last: AtomicU64,
    pub events_written: AtomicU64,

    pub stream_clients: AtomicI64,
    pub stream_evictions: AtomicU64,
    pub stream_lag_drops: AtomicU64,
}

impl IngestMetrics {
    pub fn protocol(&self, proto: Protocol) -> &ProtocolCounters {
        match proto {
            Protocol::SyslogUdp => &self.syslog_udp,
            Protocol::SyslogTcp => &self.syslog_tcp,
            Protocol::GelfUdp => &self.gelf_udp,
            Protocol::GelfTcp => &self.gelf_tcp,
            Protocol::Beats => &self.beats,
            Protocol::Fluent => &self.fluent,
            Protocol::Http => &self.http,
            Protocol::FileTail => &self.file_tail,
        }
    }

    pub fn count_drop(&self, level: LogLevel) {
        self.drops_by_level[level.rank() as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let drops: HashMap<&'static str, u64> = LogLevel::ALL
            .iter()
            .map(|l| {
                (
                    l.as_str(),
                    self.drops_by_level[l.rank() as usize].load(Ordering::Relaxed),
                )
            })
            .collect();

        json!({
            "protocols": {
                "syslog_udp": self.syslog_udp.snapshot(),
                "syslog_tcp": self.syslog_tcp.snapshot(),
                "gelf_udp": self.gelf_udp.snapshot(),
                "gelf_tcp": self.gelf_tcp.snapshot(),
                "beats": self.beats.snapshot(),
                "fluent": self.fluent.snapshot(),
                "http": self.http.snapshot(),
                "file_tail": self.file_tail.snapshot(),
            },
            "queue": {
                "depth": self.queue_depth.load(Ordering::Relaxed),
                "drops_by_level": drops,
            },
            "writer": {
                "batches_written": self.batches_written.load(Ordering::Relaxed),
                "batches_failed": self.batches_failed.load(Ordering::Relaxed),
                "batches_quarantined": self.batches_quarantined.load(Ordering::Relaxed),
                "events_written": self.events_written.load(Ordering::Relaxed),
                "write_latency_ms": self.write_latency_ms_last.load(Ordering::Relaxed),
                "dedup_discarded": self.dedup_discarded.load(Ordering::Relaxed),
            },
            "stream": {
                "clients": self.stream_clients.load(Ordering::Relaxed),
                "evictions": self.stream_evictions.load(Ordering::Relaxed),
                "lag_drops": self.stream_lag_drops.load(Ordering::Relaxed),
            },
        })
    }
}
