use flate2::read::ZlibDecoder;
use std::io::Read;

use crate::{Error, Result};

const VERSION: u8 = b'2';
const TYPE_WINDOW: u8 = b'W';
const TYPE_JSON: u8 = b'J';
const TYPE_COMPRESSED: u8 = b'C';
const TYPE_ACK: u8 = b'A';

/// Caps a single JSON frame and a compressed envelope.
const MAX_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;

/// What a `push` call produced.
#[derive(Debug, Default)]
pub struct BeatsProgress {
    /// Decoded `(sequence, json_payload)` pairs in arrival order
    pub records: Vec<(u32, Vec<u8>)>,
    /// When set, the server owes the client an ACK for this sequence
    pub ack_due: Option<u32>,
}

/// Incremental Lumberjack v2 decoder; one per TCP connection.
#[derive(Debug, Default)]
pub struct BeatsDecoder {
    buf: Vec<u8>,
    window_size: u32,
    frames_in_window: u32,
    last_seq: u32,
}

impl BeatsDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes from the socket; returns decoded records and ACK duty.
    pub fn push(&mut self, data: &[u8]) -> Result<BeatsProgress> {
        self.buf.extend_from_slice(data);

        let mut progress = BeatsProgress::default();
        loop {
            let consumed = self.parse_one(&mut progress)?;
            if consumed == 0 {
                break;
            }
            self.buf.drain(..consumed);
        }
        Ok(progress)
    }

    /// Parse a single frame from the front of `buf`; 0 means incomplete.
    fn parse_one(&mut self, progress: &mut BeatsProgress) -> Result<usize> {
        if self.buf.len() < 2 {
            return Ok(0);
        }
        if self.buf[0] != VERSION {
            return Err(Error::malformed(
                "bad_version",
                format!("0x{:02x}", self.buf[0]),
            ));
        }

        match self.buf[1] {
            TYPE_WINDOW => {
                if self.buf.len() < 6 {
                    return Ok(0);
                }
                self.window_size = read_u32(&self.buf[2..6]);
                self.frames_in_window = 0;
                Ok(6)
            }
            TYPE_JSON => {
                if self.buf.len() < 10 {
                    return Ok(0);
                }
                let seq = read_u32(&self.buf[2..6]);
                let len = read_u32(&self.buf[6..10]) as usize;
                if len > MAX_PAYLOAD_BYTES {
                    return Err(Error::malformed("frame_too_large", format!("{} bytes", len)));
                }
                if self.buf.len() < 10 + len {
                    return Ok(0);
                }
                let payload = self.buf[10..10 + len].to_vec();
                self.accept_record(seq, payload, progress);
                Ok(10 + len)
            }
            TYPE_COMPRESSED => {
                if self.buf.len() < 6 {
                    return Ok(0);
                }
                let len = read_u32(&self.buf[2..6]) as usize;
                if len > MAX_PAYLOAD_BYTES {
                    return Err(Error::malformed("frame_too_large", format!("{} bytes", len)));
                }
                if self.buf.len() < 6 + len {
                    return Ok(0);
                }
                let mut inflated = Vec::new();
                ZlibDecoder::new(&self.buf[6..6 + len])
                    .take(MAX_PAYLOAD_BYTES as u64 * 4)
                    .read_to_end(&mut inflated)
                    .map_err(Error::Compression)?;
                self.parse_inflated(&inflated, progress)?;
                Ok(6 + len)
            }
            other => Err(Error::malformed("bad_frame_type", format!("0x{:02x}", other))),
        }
    }

    /// Frames inside a compressed envelope are complete by construction.
    fn parse_inflated(&mut self, mut data: &[u8], progress: &mut BeatsProgress) -> Result<()> {
        while data.len() >= 2 {
            if data[0] != VERSION {
                return Err(Error::malformed("bad_version", "inside compressed envelope"));
            }
            match data[1] {
                TYPE_JSON => {
                    if data.len() < 10 {
                        return Err(Error::malformed("short_frame", "compressed JSON header"));
                    }
                    let seq = read_u32(&data[2..6]);
                    let len = read_u32(&data[6..10]) as usize;
                    if data.len() < 10 + len {
                        return Err(Error::malformed("short_frame", "compressed JSON payload"));
                    }
                    self.accept_record(seq, data[10..10 + len].to_vec(), progress);
                    data = &data[10 + len..];
                }
                TYPE_WINDOW => {
                    if data.len() < 6 {
                        return Err(Error::malformed("short_frame", "compressed window"));
                    }
                    self.window_size = read_u32(&data[2..6]);
                    self.frames_in_window = 0;
                    data = &data[6..];
                }
                other => {
                    return Err(Error::malformed(
                        "bad_frame_type",
                        format!("0x{:02x} inside compressed envelope", other),
                    ))
                }
            }
        }
        Ok(())
    }

    fn accept_record(&mut self, seq: u32, payload: Vec<u8>, progress: &mut BeatsProgress) {
        self.last_seq = seq;
        self.frames_in_window += 1;
        progress.records.push((seq, payload));
        if self.window_size > 0 && self.frames_in_window >= self.window_size {
            progress.ack_due = Some(self.last_seq);
            self.frames_in_window = 0;
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes(bytes[..4].try_into().unwrap())
}

/// Encode the ACK frame the server sends after a window completes.
pub fn make_ack(seq: u32) -> [u8; 6] {
    let mut out = [0u8; 6];
    out[0] = VERSION;
    out[1] = TYPE_ACK;
    out[2..6].copy_from_slice(&seq.to_be_bytes());
    out
}
