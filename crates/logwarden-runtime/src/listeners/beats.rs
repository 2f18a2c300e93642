use logwarden_protocols::beats::{make_ack, BeatsDecoder};
use logwarden_types::{Protocol, RawFrame};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use super::ListenerContext;

/// Lumberjack v2 server: window → data/compressed frames → ACK.
pub(crate) async fn run(listener: TcpListener, ctx: ListenerContext) {
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
                    Err(err) => debug!(error = %err, "beats accept error"),
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
    let mut decoder = BeatsDecoder::new();
    let mut buf = vec![0u8; 32 * 1024];

    loop {
        let n = tokio::select! {
            read = stream.read(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            },
            _ = shutdown.wait() => return,
        };

        let progress = match decoder.push(&buf[..n]) {
            Ok(progress) => progress,
            Err(err) => {
                ctx.metrics
                    .protocol(Protocol::Beats)
                    .count_malformed(err.reason());
                // Framing is unrecoverable on a corrupt lumberjack stream
                return;
            }
        };

        for (_seq, payload) in progress.records {
            ctx.forward(RawFrame::new(Protocol::Beats, payload, Some(peer)));
        }

        // ACK after each completed window; the client throttles on this
        if let Some(seq) = progress.ack_due {
            if stream.write_all(&make_ack(seq)).await.is_err() {
                return;
            }
        }
    }
}
