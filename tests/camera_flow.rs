//! End-to-end camera flow against the router: live upstream doubles, the
//! real supervisor and workers, and the in-memory catalog. TLS termination
//! is exercised separately; these tests drive the routes directly.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use camrelay::catalog::{CameraCatalog, MemoryCatalog};
use camrelay::poller::PollerSupervisor;
use camrelay::state::{AppConfig, AppState};
use camrelay::web_api;
use futures::StreamExt;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn jpeg_frame() -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, image::Rgb([40, 40, 200])));
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Jpeg)
        .unwrap();
    out
}

/// Upstream double: answers `GET /stream` on `bind_ip` with an endless
/// concatenation of JPEG frames.
async fn spawn_upstream(bind_ip: &str) -> SocketAddr {
    let listener = TcpListener::bind((bind_ip, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                if socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\n\r\n")
                    .await
                    .is_err()
                {
                    return;
                }
                let frame = jpeg_frame();
                loop {
                    if socket.write_all(&frame).await.is_err() {
                        return;
                    }
                    let _ = socket.flush().await;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            });
        }
    });
    addr
}

struct TestHarness {
    state: AppState,
    root: CancellationToken,
}

impl TestHarness {
    async fn new() -> Self {
        let catalog: Arc<dyn CameraCatalog> = Arc::new(MemoryCatalog::new());
        let root = CancellationToken::new();
        let poller = PollerSupervisor::new(catalog.clone(), &root).await.unwrap();
        let _supervisor_task = poller.start().unwrap();
        let state = AppState {
            config: AppConfig::default(),
            catalog,
            poller,
            shutdown: root.clone(),
        };
        Self { state, root }
    }

    fn router(&self) -> axum::Router {
        web_api::create_router(self.state.clone())
    }

    async fn request(&self, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn add_camera(&self, name: &str, addr: SocketAddr) {
        let (status, _) = self
            .request(
                "POST",
                "/camera/add",
                json!({"camera": {"name": name, "ip": addr.ip().to_string(), "port": addr.port()}}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    /// Poll `/camera/snap` until the camera reports a non-empty frame
    async fn wait_for_frame(&self, ip: &str, deadline: Duration) -> Value {
        let start = tokio::time::Instant::now();
        loop {
            let (status, body) = self.request("GET", "/camera/snap", json!({})).await;
            assert_eq!(status, StatusCode::OK);
            let data = body["cameras"][ip]["data"].as_str().unwrap_or("");
            if !data.is_empty() {
                return body;
            }
            assert!(
                start.elapsed() < deadline,
                "no frame for {ip} within {deadline:?}"
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

#[tokio::test]
async fn test_empty_roster_snapshot_and_list() {
    let harness = TestHarness::new().await;

    let (status, body) = harness.request("GET", "/camera/list", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"cameras": []}));

    let (status, body) = harness.request("GET", "/camera/snap", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"cameras": {}}));
}

#[tokio::test]
async fn test_add_then_snap_returns_live_frame() {
    let harness = TestHarness::new().await;
    let upstream = spawn_upstream("127.0.0.1").await;
    harness.add_camera("front", upstream).await;

    let body = harness
        .wait_for_frame("127.0.0.1", Duration::from_secs(3))
        .await;
    let camera = &body["cameras"]["127.0.0.1"];
    assert_eq!(camera["name"], "front");

    // The relayed bytes are a re-encoded, self-consistent JPEG.
    use base64::Engine;
    let data = base64::engine::general_purpose::STANDARD
        .decode(camera["data"].as_str().unwrap())
        .unwrap();
    assert_eq!(&data[..2], &[0xff, 0xd8]);
    assert_eq!(&data[data.len() - 2..], &[0xff, 0xd9]);
}

#[tokio::test]
async fn test_snap_by_ip_filters_to_one_camera() {
    let harness = TestHarness::new().await;
    let upstream = spawn_upstream("127.0.0.1").await;
    harness.add_camera("front", upstream).await;
    harness
        .wait_for_frame("127.0.0.1", Duration::from_secs(3))
        .await;

    let (status, body) = harness
        .request("GET", "/camera/snap", json!({"ip": "127.0.0.1"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let cameras = body["cameras"].as_object().unwrap();
    assert_eq!(cameras.len(), 1);
    assert!(cameras.contains_key("127.0.0.1"));
}

#[tokio::test]
async fn test_snap_consecutive_reads_are_fresh_or_identical() {
    let harness = TestHarness::new().await;
    let upstream = spawn_upstream("127.0.0.1").await;
    harness.add_camera("front", upstream).await;
    harness
        .wait_for_frame("127.0.0.1", Duration::from_secs(3))
        .await;

    let (_, first) = harness.request("GET", "/camera/snap", json!({})).await;
    let (_, second) = harness.request("GET", "/camera/snap", json!({})).await;
    // Freshest-wins: either identical bytes or a newer frame, never garbage.
    assert!(first["cameras"]["127.0.0.1"]["data"].as_str().is_some());
    assert!(second["cameras"]["127.0.0.1"]["data"].as_str().is_some());
}

#[tokio::test]
async fn test_remove_while_subscribed_drops_camera_from_parts() {
    let harness = TestHarness::new().await;
    let upstream_a = spawn_upstream("127.0.0.1").await;
    let upstream_b = spawn_upstream("127.0.0.2").await;
    harness.add_camera("keep", upstream_a).await;
    harness.add_camera("drop", upstream_b).await;
    harness
        .wait_for_frame("127.0.0.1", Duration::from_secs(3))
        .await;
    harness
        .wait_for_frame("127.0.0.2", Duration::from_secs(3))
        .await;

    let request = Request::builder()
        .method("GET")
        .uri("/camera/subscribe")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({}).to_string()))
        .unwrap();
    let response = harness.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let mut parts = response.into_body().into_data_stream();

    // The stream carries both cameras first.
    let first = tokio::time::timeout(Duration::from_secs(1), parts.next())
        .await
        .expect("no part within 1s")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(first.to_vec()).unwrap();
    assert!(text.contains("127.0.0.1"));
    assert!(text.contains("127.0.0.2"));

    let (status, _) = harness
        .request(
            "POST",
            "/camera/remove",
            json!({"camera": {"ip": "127.0.0.2"}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Within a couple of supervisor ticks the removed camera vanishes from
    // the parts while the subscription itself stays up.
    let start = tokio::time::Instant::now();
    loop {
        let part = tokio::time::timeout(Duration::from_secs(1), parts.next())
            .await
            .expect("subscription stalled")
            .expect("subscription ended")
            .unwrap();
        let text = String::from_utf8(part.to_vec()).unwrap();
        if !text.contains("127.0.0.2") {
            assert!(text.contains("127.0.0.1"));
            break;
        }
        assert!(
            start.elapsed() < Duration::from_secs(3),
            "removed camera still present in parts"
        );
    }
}

#[tokio::test]
async fn test_upstream_flap_recovers_via_supervisor() {
    let harness = TestHarness::new().await;

    // Upstream that serves one connection a short burst then closes, and
    // keeps serving on subsequent connections.
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut first = true;
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let close_early = first;
            first = false;
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\n\r\n")
                    .await;
                let frame = jpeg_frame();
                if close_early {
                    let _ = socket.write_all(&frame).await;
                    // Drop the socket: the worker sees EOF and dies.
                    return;
                }
                loop {
                    if socket.write_all(&frame).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            });
        }
    });

    harness.add_camera("flappy", addr).await;
    // First connection dies, the supervisor restarts the worker on a later
    // tick, and fresh frames flow again.
    harness
        .wait_for_frame("127.0.0.1", Duration::from_secs(5))
        .await;
}

#[tokio::test]
async fn test_shutdown_terminates_pool_and_sessions() {
    let harness = TestHarness::new().await;
    let upstream = spawn_upstream("127.0.0.1").await;
    harness.add_camera("front", upstream).await;
    harness
        .wait_for_frame("127.0.0.1", Duration::from_secs(3))
        .await;

    let response = harness
        .router()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/camera/subscribe")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let mut parts = response.into_body().into_data_stream();
    tokio::time::timeout(Duration::from_secs(1), parts.next())
        .await
        .expect("no part within 1s");

    harness.root.cancel();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Supervisor wound down and the worker pool is empty.
    assert!(!harness.state.poller.is_running());
    assert!(harness.state.poller.workers().await.is_empty());

    // The subscription ends (terminator then end-of-stream) shortly after.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        match tokio::time::timeout_at(deadline, parts.next()).await {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(_) => panic!("subscription did not end after shutdown"),
        }
    }
}
