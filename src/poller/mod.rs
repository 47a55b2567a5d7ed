//! Poll supervisor - dynamic camera worker pool
//!
//! ## Responsibilities
//!
//! - Own the live worker registry and every worker's cancellation handle
//! - Reconcile the worker set against the catalog roster once per second
//! - Restart workers that died (upstream failure, progress deadline)
//! - Tear the pool down bottom-up on process shutdown
//!
//! The supervisor is the only component that mutates the registry and the
//! only observer of worker death. Request handlers take a snapshot of the
//! registry and release it before doing any encoding work.

pub mod frame;
pub mod worker;

pub use worker::{FrameSnapshot, PollWorker};

use crate::catalog::CameraCatalog;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Reconciliation cadence
const RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

/// A live worker plus its cancellation handle.
/// Both leave the registry together, so the worker map and the cancel map
/// always share the same key set.
struct WorkerHandle {
    worker: Arc<PollWorker>,
    cancel: CancellationToken,
}

/// Supervisor owning the camera worker pool
pub struct PollerSupervisor {
    catalog: Arc<dyn CameraCatalog>,
    registry: RwLock<HashMap<String, WorkerHandle>>,
    roster: RwLock<Vec<crate::catalog::CameraRecord>>,
    roster_stale: AtomicBool,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl PollerSupervisor {
    /// Create the supervisor with an initial roster load.
    /// A catalog failure here is fatal; mid-run failures are tolerated.
    pub async fn new(
        catalog: Arc<dyn CameraCatalog>,
        root: &CancellationToken,
    ) -> Result<Arc<Self>> {
        let roster = catalog.roster(None).await?;
        tracing::info!(cameras = roster.len(), "Initial camera roster loaded");

        Ok(Arc::new(Self {
            catalog,
            registry: RwLock::new(HashMap::new()),
            roster: RwLock::new(roster),
            roster_stale: AtomicBool::new(false),
            running: AtomicBool::new(false),
            cancel: root.child_token(),
        }))
    }

    /// Flag the in-memory roster as stale. Called by the add/remove
    /// endpoints; the next tick re-reads the catalog. Never blocks.
    pub fn mark_roster_stale(&self) {
        self.roster_stale.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the live workers for request handlers
    pub async fn workers(&self) -> HashMap<String, Arc<PollWorker>> {
        let registry = self.registry.read().await;
        registry
            .iter()
            .map(|(ip, handle)| (ip.clone(), handle.worker.clone()))
            .collect()
    }

    /// Spawn the reconciliation loop and hand back its join handle so the
    /// caller can await completion on shutdown. Fails when already running.
    pub fn start(self: &Arc<Self>) -> Result<tokio::task::JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::Internal("poller is already running".to_string()));
        }

        tracing::info!("Starting poll supervisor");
        let supervisor = Arc::clone(self);
        Ok(tokio::spawn(supervisor.run()))
    }

    async fn run(self: Arc<Self>) {
        let mut tick = tokio::time::interval(RECONCILE_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Poll supervisor terminating");
                    break;
                }
                _ = tick.tick() => {
                    self.reconcile().await;
                }
            }
        }

        // Cancel the remaining workers explicitly; the token hierarchy
        // already reaches them, either mechanism suffices.
        let mut registry = self.registry.write().await;
        for (ip, handle) in registry.drain() {
            tracing::info!(camera_ip = %ip, "Terminating worker on shutdown");
            handle.cancel.cancel();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// One reconciliation pass.
    ///
    /// Postcondition: the registry key set equals the roster IP set.
    pub(crate) async fn reconcile(&self) {
        if self.roster_stale.swap(false, Ordering::SeqCst) {
            match self.catalog.roster(None).await {
                Ok(fresh) => {
                    tracing::info!(cameras = fresh.len(), "Camera roster refreshed");
                    *self.roster.write().await = fresh;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Roster refresh failed, keeping previous roster");
                    // Retry on the next tick.
                    self.roster_stale.store(true, Ordering::SeqCst);
                }
            }
        }

        let roster = self.roster.read().await.clone();
        let mut registry = self.registry.write().await;

        for camera in &roster {
            match registry.get(&camera.ip) {
                None => {
                    tracing::info!(
                        camera_ip = %camera.ip,
                        camera_name = %camera.name,
                        "Creating new worker"
                    );
                    let cancel = self.cancel.child_token();
                    let worker = Arc::new(PollWorker::new(
                        camera.ip.clone(),
                        camera.name.clone(),
                        camera.port,
                        cancel.clone(),
                    ));
                    if let Err(e) = worker.start() {
                        tracing::error!(
                            camera_ip = %camera.ip,
                            error = %e,
                            "Failed to start worker"
                        );
                    }
                    registry.insert(camera.ip.clone(), WorkerHandle { worker, cancel });
                }
                Some(handle) if !handle.worker.is_running() => {
                    tracing::info!(
                        camera_ip = %camera.ip,
                        camera_name = %camera.name,
                        "Restarting worker"
                    );
                    if let Err(e) = handle.worker.start() {
                        tracing::error!(
                            camera_ip = %camera.ip,
                            error = %e,
                            "Failed to restart worker"
                        );
                    }
                }
                Some(_) => {}
            }
        }

        registry.retain(|ip, handle| {
            let keep = roster.iter().any(|camera| &camera.ip == ip);
            if !keep {
                tracing::info!(camera_ip = %ip, "Stale worker, terminating");
                handle.cancel.cancel();
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MemoryCatalog, NewCamera};

    fn camera(ip: &str) -> NewCamera {
        NewCamera {
            name: format!("cam-{ip}"),
            ip: ip.to_string(),
            // Nothing listens here; workers die fast and that is fine.
            port: 1,
        }
    }

    async fn supervisor_with(
        ips: &[&str],
    ) -> (Arc<MemoryCatalog>, Arc<PollerSupervisor>, CancellationToken) {
        let catalog = Arc::new(MemoryCatalog::new());
        for ip in ips {
            catalog.insert(camera(ip)).await.unwrap();
        }
        let root = CancellationToken::new();
        let supervisor = PollerSupervisor::new(catalog.clone(), &root).await.unwrap();
        (catalog, supervisor, root)
    }

    #[tokio::test]
    async fn test_reconcile_creates_workers_for_roster() {
        let (_, supervisor, _root) = supervisor_with(&["10.0.0.1", "10.0.0.2"]).await;
        supervisor.reconcile().await;

        let workers = supervisor.workers().await;
        let mut ips: Vec<_> = workers.keys().cloned().collect();
        ips.sort();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[tokio::test]
    async fn test_reconcile_removes_stale_workers() {
        let (catalog, supervisor, _root) = supervisor_with(&["10.0.0.1", "10.0.0.2"]).await;
        supervisor.reconcile().await;
        assert_eq!(supervisor.workers().await.len(), 2);

        catalog.remove("10.0.0.2").await.unwrap();
        supervisor.mark_roster_stale();
        supervisor.reconcile().await;

        let workers = supervisor.workers().await;
        assert_eq!(workers.len(), 1);
        assert!(workers.contains_key("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_reconcile_picks_up_added_camera() {
        let (catalog, supervisor, _root) = supervisor_with(&[]).await;
        supervisor.reconcile().await;
        assert!(supervisor.workers().await.is_empty());

        catalog.insert(camera("10.0.0.9")).await.unwrap();
        supervisor.mark_roster_stale();
        supervisor.reconcile().await;

        assert!(supervisor.workers().await.contains_key("10.0.0.9"));
    }

    #[tokio::test]
    async fn test_dead_worker_restarts_on_next_tick() {
        let (_, supervisor, _root) = supervisor_with(&["10.0.0.1"]).await;
        supervisor.reconcile().await;

        // Connection refused: the worker dies almost immediately.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let workers = supervisor.workers().await;
        let worker = workers.get("10.0.0.1").unwrap();
        assert!(!worker.is_running());

        // Next tick restarts the same worker.
        supervisor.reconcile().await;
        let workers = supervisor.workers().await;
        assert!(workers.contains_key("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (_, supervisor, _root) = supervisor_with(&[]).await;
        let _handle = supervisor.start().unwrap();
        assert!(supervisor.start().is_err());
    }

    #[tokio::test]
    async fn test_root_cancel_tears_down_pool() {
        let (_, supervisor, root) = supervisor_with(&["10.0.0.1"]).await;
        let handle = supervisor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!supervisor.workers().await.is_empty());

        root.cancel();
        // The loop drains the registry and finishes; its handle resolves.
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("supervisor did not stop after root cancel")
            .unwrap();
        assert!(!supervisor.is_running());
        assert!(supervisor.workers().await.is_empty());
    }
}
