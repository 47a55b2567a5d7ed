//! TLS-terminating request frontend
//!
//! Binds the listener, enforces mutual TLS with the revocation-checking
//! peer verifier, and serves the API router over each accepted connection.
//! Handshake failures drop the connection before any route runs.

use crate::error::Result;
use axum::extract::ConnectInfo;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;

/// Ceiling on a slow TLS handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Request header read ceiling. Kept long enough that a subscription
/// stream is never cut short by the server itself.
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Accept loop. Runs until the cancellation token fires, then waits for
/// the in-flight connection tasks to drain before returning so the caller
/// can await full completion.
pub async fn serve(
    addr: String,
    router: Router,
    tls_config: Arc<rustls::ServerConfig>,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Listening");

    let acceptor = TlsAcceptor::from(tls_config);
    let connections = TaskTracker::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Listener terminating");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let acceptor = acceptor.clone();
                let router = router.clone();
                let cancel = cancel.clone();
                connections.spawn(async move {
                    handle_connection(stream, peer_addr, acceptor, router, cancel).await;
                });
            }
        }
    }

    // Connection tasks observe the same token and wind down on their own.
    connections.close();
    connections.wait().await;
    tracing::info!("All connections closed");
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    router: Router,
    cancel: CancellationToken,
) {
    let tls_stream = match tokio::time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(tls_stream)) => tls_stream,
        Ok(Err(e)) => {
            tracing::warn!(peer = %peer_addr, error = %e, "TLS handshake failed");
            return;
        }
        Err(_) => {
            tracing::warn!(peer = %peer_addr, "TLS handshake timed out");
            return;
        }
    };

    let service = hyper::service::service_fn(move |mut req: hyper::Request<hyper::body::Incoming>| {
        req.extensions_mut().insert(ConnectInfo(peer_addr));
        router.clone().oneshot(req)
    });

    let mut builder = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(HEADER_READ_TIMEOUT);

    let conn = builder.serve_connection_with_upgrades(TokioIo::new(tls_stream), service);
    tokio::pin!(conn);

    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!(peer = %peer_addr, "Connection dropped on shutdown");
        }
        result = conn.as_mut() => {
            if let Err(e) = result {
                tracing::debug!(peer = %peer_addr, error = %e, "Connection closed with error");
            }
        }
    }
}
