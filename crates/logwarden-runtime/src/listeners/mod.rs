//! Protocol listeners: independent accept loops that frame incoming bytes
//! and forward `RawFrame`s to the normalizer channel. A listener never
//! blocks on downstream backpressure; when the frame channel is full the
//! frame is dropped and counted.

mod beats;
mod filetail;
mod fluent;
mod gelf;
mod syslog;

use logwarden_store::Database;
use logwarden_types::RawFrame;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::metrics::IngestMetrics;
use crate::shutdown::Shutdown;
use crate::{Error, Result};

/// Datagram size cap shared by the UDP listeners.
pub(crate) const MAX_DATAGRAM: usize = 64 * 1024;

pub(crate) struct ListenerContext {
    pub frames: mpsc::Sender<RawFrame>,
    pub metrics: Arc<IngestMetrics>,
    pub db: Arc<Mutex<Database>>,
    pub shutdown: Shutdown,
}

impl ListenerContext {
    /// Forward without blocking; a full pipeline costs this frame, counted
    /// against its protocol.
    pub(crate) fn forward(&self, frame: RawFrame) {
        let proto = frame.proto;
        if self.frames.try_send(frame).is_err() {
            self.metrics
                .protocol(proto)
                .count_malformed("pipeline_full");
        }
    }

    pub(crate) fn clone_for_task(&self) -> Self {
        Self {
            frames: self.frames.clone(),
            metrics: self.metrics.clone(),
            db: self.db.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Bind and spawn every enabled listener. Bind failures are fatal at
/// startup and map port conflicts to their own exit code.
pub async fn spawn_all(
    config: &Config,
    frames: mpsc::Sender<RawFrame>,
    metrics: Arc<IngestMetrics>,
    db: Arc<Mutex<Database>>,
    shutdown: Shutdown,
) -> Result<Vec<JoinHandle<()>>> {
    let ctx = ListenerContext {
        frames,
        metrics,
        db,
        shutdown,
    };
    let mut tasks = Vec::new();
    let toggles = &config.listeners;

    if toggles.syslog_enabled {
        let udp = bind_udp(toggles.syslog_udp_port).await?;
        info!(port = toggles.syslog_udp_port, "syslog UDP listening");
        tasks.push(tokio::spawn(syslog::run_udp(udp, ctx.clone_for_task())));

        let tcp = bind_tcp(toggles.syslog_tcp_port).await?;
        info!(port = toggles.syslog_tcp_port, "syslog TCP listening");
        tasks.push(tokio::spawn(syslog::run_tcp(tcp, ctx.clone_for_task())));
    }

    if toggles.gelf_enabled {
        let udp = bind_udp(toggles.gelf_udp_port).await?;
        info!(port = toggles.gelf_udp_port, "GELF UDP listening");
        tasks.push(tokio::spawn(gelf::run_udp(udp, ctx.clone_for_task())));

        let tcp = bind_tcp(toggles.gelf_tcp_port).await?;
        info!(port = toggles.gelf_tcp_port, "GELF TCP listening");
        tasks.push(tokio::spawn(gelf::run_tcp(tcp, ctx.clone_for_task())));
    }

    if toggles.beats_enabled {
        let tcp = bind_tcp(toggles.beats_port).await?;
        info!(port = toggles.beats_port, "Beats listening");
        tasks.push(tokio::spawn(beats::run(tcp, ctx.clone_for_task())));
    }

    if toggles.fluent_enabled {
        let tcp = bind_tcp(toggles.fluent_port).await?;
        info!(port = toggles.fluent_port, "Fluent HTTP listening");
        tasks.push(tokio::spawn(fluent::run(tcp, ctx.clone_for_task())));
    }

    for path in &toggles.tail_paths {
        info!(path = %path.display(), "file tail active");
        tasks.push(tokio::spawn(filetail::run(
            path.clone(),
            ctx.clone_for_task(),
        )));
    }

    Ok(tasks)
}

async fn bind_udp(port: u16) -> Result<UdpSocket> {
    UdpSocket::bind(("0.0.0.0", port))
        .await
        .map_err(|e| bind_error(e, port))
}

async fn bind_tcp(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| bind_error(e, port))
}

pub(crate) fn bind_error(err: std::io::Error, port: u16) -> Error {
    if err.kind() == std::io::ErrorKind::AddrInUse {
        Error::PortInUse(port)
    } else {
        Error::Io(err)
    }
}
