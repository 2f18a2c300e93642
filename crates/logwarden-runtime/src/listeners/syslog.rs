use logwarden_protocols::syslog::SyslogTcpFramer;
use logwarden_types::{Protocol, RawFrame};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::debug;

use super::{ListenerContext, MAX_DATAGRAM};

/// One syslog message per datagram.
pub(crate) async fn run_udp(socket: UdpSocket, ctx: ListenerContext) {
    let mut shutdown = ctx.shutdown.clone();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((n, peer)) => {
                        ctx.forward(RawFrame::new(
                            Protocol::SyslogUdp,
                            buf[..n].to_vec(),
                            Some(peer),
                        ));
                    }
                    Err(err) => debug!(error = %err, "syslog UDP recv error"),
                }
            }
            _ = shutdown.wait() => return,
        }
    }
}

/// Octet-count framing with LF fallback, one framer per connection.
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
                    Err(err) => debug!(error = %err, "syslog TCP accept error"),
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
    let mut framer = SyslogTcpFramer::new();
    let mut buf = vec![0u8; 16 * 1024];

    loop {
        let n = tokio::select! {
            read = stream.read(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            },
            _ = shutdown.wait() => return,
        };

        match framer.push(&buf[..n]) {
            Ok(frames) => {
                for payload in frames {
                    ctx.forward(RawFrame::new(Protocol::SyslogTcp, payload, Some(peer)));
                }
            }
            Err(err) => {
                ctx.metrics
                    .protocol(Protocol::SyslogTcp)
                    .count_malformed(err.reason());
            }
        }
    }
}
