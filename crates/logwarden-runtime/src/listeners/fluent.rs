use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::any;
use axum::Router;
use logwarden_types::{Protocol, RawFrame};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::debug;

use super::ListenerContext;

/// Fluent's HTTP input: every POST body is one forward payload, JSON or
/// msgpack (the decoder sniffs; Content-Type is advisory on this wire).
pub(crate) async fn run(listener: TcpListener, ctx: ListenerContext) {
    let shutdown = ctx.shutdown.clone();
    let app = Router::new()
        .fallback(any(ingest))
        .with_state(Arc::new(ctx));

    let mut shutdown_for_server = shutdown;
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_for_server.wait().await;
    })
    .await;

    if let Err(err) = result {
        debug!(error = %err, "fluent listener stopped");
    }
}

async fn ingest(
    State(ctx): State<Arc<ListenerContext>>,
    axum::extract::ConnectInfo(peer): axum::extract::ConnectInfo<SocketAddr>,
    body: Bytes,
) -> StatusCode {
    if body.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    ctx.forward(RawFrame::new(Protocol::Fluent, body.to_vec(), Some(peer)));
    StatusCode::OK
}
