//! API routes

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::multipart::MultipartWriter;
use super::types::{
    AddCameraRequest, CameraFrame, CamerasResponse, ListCamerasRequest, ListCamerasResponse,
    RemoveCameraRequest, SnapCamerasRequest, DEFAULT_LIST_LIMIT,
};
use crate::error::{Error, Result};
use crate::poller::PollerSupervisor;
use crate::state::AppState;

/// Interval between subscription parts
const SUBSCRIBE_CADENCE: Duration = Duration::from_millis(10);

/// A part write blocked longer than this drops the subscriber
const SUBSCRIBE_WRITE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/camera/list", get(list_cameras))
        .route("/camera/add", post(add_camera))
        .route("/camera/remove", post(remove_camera))
        .route("/camera/snap", get(snap_cameras))
        .route("/camera/subscribe", get(subscribe_cameras))
        .layer(middleware::from_fn(log_request))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Request-logging middleware: method, path, peer address
async fn log_request(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
    next: Next,
) -> Response {
    let peer = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    tracing::info!(
        method = %req.method(),
        path = %req.uri().path(),
        peer = %peer,
        "Request"
    );
    next.run(req).await
}

/// Map a missing or malformed JSON body to a 400
fn require_json<T>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(Error::Validation(format!(
            "failed to deserialize body: {rejection}"
        ))),
    }
}

async fn ping() -> &'static str {
    "pong"
}

async fn list_cameras(
    State(state): State<AppState>,
    body: std::result::Result<Json<ListCamerasRequest>, JsonRejection>,
) -> Result<Json<ListCamerasResponse>> {
    let req = require_json(body)?;
    let limit = if req.limit == 0 {
        DEFAULT_LIST_LIMIT
    } else {
        req.limit
    };
    let cameras = state.catalog.roster(Some(limit)).await?;
    Ok(Json(ListCamerasResponse { cameras }))
}

async fn add_camera(
    State(state): State<AppState>,
    body: std::result::Result<Json<AddCameraRequest>, JsonRejection>,
) -> Result<Response> {
    let req = require_json(body)?;
    let record = state.catalog.insert(req.camera).await?;
    tracing::info!(
        camera_ip = %record.ip,
        camera_port = record.port,
        camera_name = %record.name,
        "Camera added"
    );

    state.poller.mark_roster_stale();
    Ok(Json(record).into_response())
}

async fn remove_camera(
    State(state): State<AppState>,
    body: std::result::Result<Json<RemoveCameraRequest>, JsonRejection>,
) -> Result<Response> {
    let req = require_json(body)?;
    if req.camera.ip.parse::<std::net::IpAddr>().is_err() {
        return Err(Error::Validation(format!(
            "invalid ip entry '{}'",
            req.camera.ip
        )));
    }

    state.catalog.remove(&req.camera.ip).await?;
    tracing::info!(camera_ip = %req.camera.ip, "Camera removed");

    // The supervisor tick is the single removal point for the worker.
    state.poller.mark_roster_stale();
    Ok(Json(json!({})).into_response())
}

async fn snap_cameras(
    State(state): State<AppState>,
    body: std::result::Result<Json<SnapCamerasRequest>, JsonRejection>,
) -> Result<Json<CamerasResponse>> {
    let req = require_json(body)?;
    let workers = state.poller.workers().await;

    let mut cameras = HashMap::new();
    match req
        .ip
        .as_deref()
        .filter(|ip| ip.parse::<std::net::IpAddr>().is_ok())
    {
        Some(ip) => {
            let worker = workers
                .get(ip)
                .ok_or_else(|| Error::Validation(format!("camera '{ip}' not found")))?;
            let snapshot = worker.snapshot().await;
            cameras.insert(
                ip.to_string(),
                CameraFrame {
                    name: worker.name().to_string(),
                    data: snapshot.data,
                },
            );
        }
        None => {
            for (ip, worker) in workers {
                let snapshot = worker.snapshot().await;
                cameras.insert(
                    ip,
                    CameraFrame {
                        name: worker.name().to_string(),
                        data: snapshot.data,
                    },
                );
            }
        }
    }

    Ok(Json(CamerasResponse { cameras }))
}

async fn subscribe_cameras(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: std::result::Result<Json<SnapCamerasRequest>, JsonRejection>,
) -> Result<Response> {
    let req = require_json(body)?;
    // Filtering, not lookup: an unknown IP simply yields empty parts.
    let filter = req.ip.filter(|ip| !ip.is_empty());

    let session_id = Uuid::new_v4();
    let peer = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    tracing::info!(
        session_id = %session_id,
        peer = %peer,
        filter = ?filter,
        "Subscription opened"
    );

    let writer = MultipartWriter::new();
    let content_type = writer.content_type();

    // Zero capacity plus the sender's guaranteed slot: at most one part
    // queues; a subscriber that stops reading stalls only its own session
    // task, never a worker.
    let (tx, rx) = futures::channel::mpsc::channel::<bytes::Bytes>(0);
    tokio::spawn(run_subscription(
        session_id,
        state.poller.clone(),
        writer,
        filter,
        tx,
        state.shutdown.clone(),
        SUBSCRIBE_WRITE_TIMEOUT,
    ));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(
            rx.map(Ok::<_, std::convert::Infallible>),
        ))
        .map_err(|e| Error::Internal(format!("failed to build stream response: {e}")))
}

/// Per-subscription session task.
///
/// Freshest-wins: every tick re-reads the current snapshots. Nothing is
/// buffered across ticks; an unchanged snapshot is emitted again as-is.
async fn run_subscription(
    session_id: Uuid,
    poller: Arc<PollerSupervisor>,
    writer: MultipartWriter,
    filter: Option<String>,
    mut tx: futures::channel::mpsc::Sender<bytes::Bytes>,
    shutdown: tokio_util::sync::CancellationToken,
    write_timeout: Duration,
) {
    let mut tick = tokio::time::interval(SUBSCRIBE_CADENCE);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(session_id = %session_id, "Subscription closed on shutdown");
                break;
            }
            _ = tick.tick() => {
                let payload = match cameras_payload(&poller, filter.as_deref()).await {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::error!(session_id = %session_id, error = %e, "Failed to serialize subscription part");
                        break;
                    }
                };
                let part = writer.part(&payload);

                match tokio::time::timeout(write_timeout, tx.send(part)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        tracing::info!(session_id = %session_id, "Subscriber disconnected");
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(session_id = %session_id, "Subscriber write timeout, dropping session");
                        break;
                    }
                }
            }
        }
    }

    let _ = tx.try_send(writer.terminator());
}

async fn cameras_payload(
    poller: &PollerSupervisor,
    filter: Option<&str>,
) -> Result<Vec<u8>> {
    let workers = poller.workers().await;

    let mut cameras = HashMap::new();
    for (ip, worker) in workers {
        if let Some(filter) = filter {
            if filter != ip {
                continue;
            }
        }
        let snapshot = worker.snapshot().await;
        cameras.insert(
            ip,
            CameraFrame {
                name: worker.name().to_string(),
                data: snapshot.data,
            },
        );
    }

    Ok(serde_json::to_vec(&CamerasResponse { cameras })?)
}
