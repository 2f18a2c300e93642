use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Ingestion protocol a frame arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    SyslogUdp,
    SyslogTcp,
    GelfUdp,
    GelfTcp,
    Beats,
    Fluent,
    Http,
    FileTail,
}

impl Protocol {
    pub const ALL: [Protocol; 8] = [
        Protocol::SyslogUdp,
        Protocol::SyslogTcp,
        Protocol::GelfUdp,
        Protocol::GelfTcp,
        Protocol::Beats,
        Protocol::Fluent,
        Protocol::Http,
        Protocol::FileTail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::SyslogUdp => "syslog_udp",
            Protocol::SyslogTcp => "syslog_tcp",
            Protocol::GelfUdp => "gelf_udp",
            Protocol::GelfTcp => "gelf_tcp",
            Protocol::Beats => "beats",
            Protocol::Fluent => "fluent",
            Protocol::Http => "http",
            Protocol::FileTail => "file_tail",
        }
    }

    /// Default category assigned when the payload does not carry one.
    pub fn default_category(&self) -> &'static str {
        match self {
            Protocol::SyslogUdp | Protocol::SyslogTcp => "syslog",
            Protocol::GelfUdp | Protocol::GelfTcp => "gelf",
            Protocol::Beats => "beats",
            Protocol::Fluent => "fluent",
            Protocol::Http => "http",
            Protocol::FileTail => "file",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One framed payload produced by a listener, before decoding.
///
/// `peer_addr` is `None` only for file-tailed frames; every network listener
/// sets it from the transport.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub proto: Protocol,
    pub payload: Vec<u8>,
    pub peer_addr: Option<SocketAddr>,
    pub received_at: DateTime<Utc>,
}

impl RawFrame {
    pub fn new(proto: Protocol, payload: Vec<u8>, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            proto,
            payload,
            peer_addr,
            received_at: Utc::now(),
        }
    }

    /// Construction with an explicit arrival instant, for tests and replays.
    pub fn at(
        proto: Protocol,
        payload: Vec<u8>,
        peer_addr: Option<SocketAddr>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            proto,
            payload,
            peer_addr,
            received_at,
        }
    }
}
