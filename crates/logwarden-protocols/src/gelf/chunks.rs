use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::{Error, Result};

/// Chunked-datagram magic bytes.
const CHUNK_MAGIC: [u8; 2] = [0x1e, 0x0f];

/// GELF allows a message to span at most 128 chunks.
const MAX_CHUNKS: u8 = 128;

/// Partial messages older than this are dropped.
pub const REASSEMBLY_TIMEOUT_SECS: i64 = 5;

#[derive(Debug)]
struct PendingMessage {
    total: u8,
    received: u8,
    parts: Vec<Option<Vec<u8>>>,
    first_seen: DateTime<Utc>,
}

/// Outcome of feeding one UDP datagram to the assembler.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// Datagram was not chunked; payload passed through untouched
    Passthrough(Vec<u8>),
    /// Chunk accepted, message still incomplete
    Pending,
    /// Final chunk arrived; payload is the reassembled message
    Complete(Vec<u8>),
}

/// Reassembles chunked GELF UDP messages.
///
/// One assembler per UDP listener. Time is passed in rather than read so the
/// timeout path is testable; the listener sweeps on its own cadence.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    pending: HashMap<u64, PendingMessage>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, datagram: &[u8], now: DateTime<Utc>) -> Result<ChunkOutcome> {
        if datagram.len() < 2 || datagram[..2] != CHUNK_MAGIC {
            return Ok(ChunkOutcome::Passthrough(datagram.to_vec()));
        }

        // Header: magic(2) + message id(8) + seq(1) + total(1)
        if datagram.len() < 12 {
            return Err(Error::malformed("short_chunk", format!("{} bytes", datagram.len())));
        }
        let message_id = u64::from_be_bytes(datagram[2..10].try_into().unwrap());
        let seq = datagram[10];
        let total = datagram[11];

        if total == 0 || total > MAX_CHUNKS || seq >= total {
            return Err(Error::malformed(
                "bad_chunk_header",
                format!("seq {} of {}", seq, total),
            ));
        }

        let entry = self.pending.entry(message_id).or_insert_with(|| PendingMessage {
            total,
            received: 0,
            parts: vec![None; total as usize],
            first_seen: now,
        });

        if entry.total != total {
            // Conflicting totals for the same id: poison, drop the message
            self.pending.remove(&message_id);
            return Err(Error::malformed("bad_chunk_header", "conflicting chunk totals"));
        }

        if entry.parts[seq as usize].is_none() {
            entry.parts[seq as usize] = Some(datagram[12..].to_vec());
            entry.received += 1;
        }

        if entry.received == entry.total {
            let entry = self.pending.remove(&message_id).unwrap();
            let mut payload = Vec::new();
            for part in entry.parts {
                payload.extend_from_slice(&part.unwrap());
            }
            return Ok(ChunkOutcome::Complete(payload));
        }

        Ok(ChunkOutcome::Pending)
    }

    /// Drop partial messages older than the reassembly timeout; returns how
    /// many were discarded so the listener can emit observability events.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::seconds(REASSEMBLY_TIMEOUT_SECS);
        let before = self.pending.len();
        self.pending.retain(|_, msg| msg.first_seen >= cutoff);
        before - self.pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Build a chunk datagram; used by tests and the emulator.
pub fn make_chunk(message_id: u64, seq: u8, total: u8, part: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + part.len());
    out.extend_from_slice(&CHUNK_MAGIC);
    out.extend_from_slice(&message_id.to_be_bytes());
    out.push(seq);
    out.push(total);
    out.extend_from_slice(part);
    out
}
