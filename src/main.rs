//! camrelay - mutually-authenticated camera relay server
//!
//! Main entry point.

use camrelay::{
    catalog::{CameraCatalog, MemoryCatalog, MySqlCatalog},
    poller::PollerSupervisor,
    revocation::RevocationCache,
    server, tls, web_api,
    state::{AppConfig, AppState},
};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camrelay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camrelay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        host = %config.host,
        port = config.port,
        server_cert = %config.server_cert.display(),
        trusted_ca_dir = %config.trusted_ca_dir.display(),
        "Configuration loaded"
    );

    // Root of the cancellation tree; SIGINT fires it.
    let root = CancellationToken::new();

    // Camera catalog
    let catalog: Arc<dyn CameraCatalog> = match &config.database_url {
        Some(url) => {
            let pool = MySqlPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await?;
            tracing::info!("Database connected");
            Arc::new(MySqlCatalog::new(pool).await?)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, camera roster is in-memory only");
            Arc::new(MemoryCatalog::new())
        }
    };

    // Certificate revocation list; optional, but a configured path that
    // fails to load is fatal.
    let revocation = match &config.ca_crl {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading CA certificate revocation list");
            let cache = Arc::new(RevocationCache::load(path).await?);
            tokio::spawn(cache.clone().watch(root.child_token()));
            Some(cache)
        }
        None => {
            tracing::warn!("CA_CRL not set, peer revocation checking disabled");
            None
        }
    };

    // TLS material
    let identity = tls::load_server_identity(&config.server_cert, &config.server_key)?;
    let issuers = tls::load_trusted_issuers(&config.trusted_ca_dir)?;
    tracing::info!(issuers = issuers.len(), "Trusted issuer pool loaded");
    let tls_config = Arc::new(tls::build_server_config(identity, issuers, revocation)?);

    // Worker pool
    let poller = PollerSupervisor::new(catalog.clone(), &root).await?;
    let poller_task = poller.start()?;
    tracing::info!("Poll supervisor started");

    // Router + TLS frontend
    let state = AppState {
        config: config.clone(),
        catalog,
        poller,
        shutdown: root.clone(),
    };
    let router = web_api::create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    let server_cancel = root.clone();
    let mut server_task = tokio::spawn(server::serve(addr, router, tls_config, server_cancel));

    // Graceful shutdown on SIGINT: cancel the tree, then await the
    // supervisor and the frontend (which drains its connections) with a
    // one-second grace ceiling. Only an overrun gets aborted.
    tokio::select! {
        result = &mut server_task => {
            result??;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Shutdown signal received");
            root.cancel();

            let drained = tokio::time::timeout(Duration::from_secs(1), async {
                let _ = poller_task.await;
                let _ = (&mut server_task).await;
            })
            .await;
            if drained.is_err() {
                tracing::warn!("Shutdown grace period elapsed, aborting remaining tasks");
                server_task.abort();
            }
            tracing::info!("Shutdown complete");
        }
    }

    Ok(())
}
