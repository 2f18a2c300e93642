use crate::{Error, Result};

/// Largest frame the TCP framer will buffer before giving up on a stream.
const MAX_FRAME_BYTES: usize = 256 * 1024;

/// Incremental framer for syslog over TCP (RFC 6587).
///
/// Octet-count framing (`"123 <123 bytes>"`) is detected per frame by a
/// leading digit run; anything else falls back to LF-terminated
/// (non-transparent) framing. One connection gets one framer.
#[derive(Debug, Default)]
pub struct SyslogTcpFramer {
    buf: Vec<u8>,
}

impl SyslogTcpFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes; returns every complete frame now available.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buf.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            match self.next_frame()? {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        Ok(frames)
    }

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        if self.buf[0].is_ascii_digit() {
            return self.next_octet_counted();
        }
        self.next_lf_terminated()
    }

    fn next_octet_counted(&mut self) -> Result<Option<Vec<u8>>> {
        let space = match self.buf.iter().position(|&b| b == b' ') {
            Some(pos) => pos,
            None => {
                // A digit run with no space yet; either incomplete or junk
                if self.buf.len() > 10 {
                    self.buf.clear();
                    return Err(Error::malformed("bad_octet_count", "unterminated length prefix"));
                }
                return Ok(None);
            }
        };

        let len_str = std::str::from_utf8(&self.buf[..space])?;
        let len: usize = len_str
            .parse()
            .map_err(|_| Error::malformed("bad_octet_count", len_str))?;
        if len > MAX_FRAME_BYTES {
            self.buf.clear();
            return Err(Error::malformed("frame_too_large", format!("{} bytes", len)));
        }

        let start = space + 1;
        if self.buf.len() < start + len {
            return Ok(None);
        }

        let frame = self.buf[start..start + len].to_vec();
        self.buf.drain(..start + len);
        Ok(Some(frame))
    }

    fn next_lf_terminated(&mut self) -> Result<Option<Vec<u8>>> {
        match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
                frame.pop(); // LF
                if frame.last() == Some(&b'\r') {
                    frame.pop();
                }
                Ok(Some(frame))
            }
            None => {
                if self.buf.len() > MAX_FRAME_BYTES {
                    self.buf.clear();
                    return Err(Error::malformed("frame_too_large", "no LF within cap"));
                }
                Ok(None)
            }
        }
    }
}
