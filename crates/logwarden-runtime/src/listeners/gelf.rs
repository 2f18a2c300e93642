use chrono::Utc;
use logwarden_protocols::gelf::{strip_nul, ChunkAssembler, ChunkOutcome};
use logwarden_types::{Protocol, RawFrame};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::debug;

use super::{ListenerContext, MAX_DATAGRAM};

/// Chunk-table sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Chunked UDP with reassembly; non-chunked datagrams pass straight through.
pub(crate) async fn run_udp(socket: UdpSocket, ctx: ListenerContext) {
    let mut shutdown = ctx.shutdown.clone();
    let mut assembler = ChunkAssembler::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                let (n, peer) = match result {
                    Ok(ok) => ok,
                    Err(err) => {
                        debug!(error = %err, "GELF UDP recv error");
                        continue;
                    }
                };
                match assembler.push(&buf[..n], Utc::now()) {
                    Ok(ChunkOutcome::Passthrough(payload)) | Ok(ChunkOutcome::Complete(payload)) => {
                        ctx.forward(RawFrame::new(Protocol::GelfUdp, payload, Some(peer)));
                    }
                    Ok(ChunkOutcome::Pending) => {}
                    Err(err) => {
                        ctx.metrics
                            .protocol(Protocol::GelfUdp)
                            .count_malformed(err.reason());
                    }
                }
            }
            _ = sweep.tick() => {
                let dropped = assembler.sweep_expired(Utc::now());
                if dropped > 0 {
                    // Observability event: partial messages timed out
                    if let Ok(mut db) = ctx.db.lock() {
                        let _ = db.record_ops_event(
                            "gelf_reassembly_timeout",
                            &serde_json::json!({ "dropped": dropped }),
                        );
                    }
                    ctx.metrics
                        .protocol(Protocol::GelfUdp)
                        .count_malformed("reassembly_timeout");
                }
            }
            _ = shutdown.wait() => return,
        }
    }
}

/// NUL-terminated frames over TCP.
pub(crate) async fn run_tcp(listener: TcpListener, ctx: ListenerContext) {
    let mut shutdown = ctx.shutdown.clone();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let conn_ctx = ctx.clone_for_task();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, conn_ctx).await;
                        });
                    }
                    Err(err) => debug!(error = %err, "GELF TCP accept error"),
                }
            }
            _ = shutdown.wait() => return,
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: std::net::SocketAddr,
    ctx: ListenerContext,
) {
    let mut shutdown = ctx.shutdown.clone();
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = vec![0u8; 16 * 1024];

    loop {
        let n = tokio::select! {
            read = stream.read(&mut buf) => match read {
                Ok(0) | Err(_) => {
                    // Trailing unterminated frame is still a frame
                    if !pending.is_empty() {
                        ctx.forward(RawFrame::new(
                            Protocol::GelfTcp,
                            strip_nul(&pending).to_vec(),
                            Some(peer),
                        ));
                    }
                    return;
                }
                Ok(n) => n,
            },
            _ = shutdown.wait() => return,
        };

        pending.extend_from_slice(&buf[..n]);
        while let Some(pos) = pending.iter().position(|&b| b == 0) {
            let frame: Vec<u8> = pending.drain(..=pos).collect();
            ctx.forward(RawFrame::new(
                Protocol::GelfTcp,
                strip_nul(&frame).to_vec(),
                Some(peer),
            ));
        }

        if pending.len() > MAX_DATAGRAM * 4 {
            ctx.metrics
                .protocol(Protocol::GelfTcp)
                .count_malformed("frame_too_large");
            pending.clear();
        }
    }
}
