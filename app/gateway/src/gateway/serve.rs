//! Shared gateway serve entrypoint, used by the binary and the tests.

use crate::{
    GatewayConfig,
    config::CONFIG_FILE,
    gateway::{Gateway, build_activator, build_sources, router::router},
};
use anyhow::Result;
use runtime::ModelRegistry;
use std::{path::Path, sync::Arc};
use tokio::sync::oneshot;

/// Handle returned by [`serve`]: holds the bound port and shutdown trigger.
pub struct ServeHandle {
    /// The port the gateway is listening on.
    pub port: u16,
    /// Send a value to trigger graceful shutdown.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Join handle for the server task.
    join: Option<tokio::task::JoinHandle<Result<(), std::io::Error>>>,
}

impl ServeHandle {
    /// Trigger graceful shutdown and wait for the server to stop.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            join.await??;
        }
        Ok(())
    }
}

/// Load config from `config_dir`, build the registry, and start serving.
///
/// `bind` overrides the configured bind address.
pub async fn serve(config_dir: &Path, bind: Option<&str>) -> Result<ServeHandle> {
    let config_path = config_dir.join(CONFIG_FILE);
    let config = GatewayConfig::load(&config_path)?;
    tracing::info!("loaded configuration from {}", config_path.display());
    serve_with_config(&config, config_dir, bind).await
}

/// Serve with an already-loaded config.
pub async fn serve_with_config(
    config: &GatewayConfig,
    config_dir: &Path,
    bind: Option<&str>,
) -> Result<ServeHandle> {
    let sources = build_sources(config, config_dir)?;
    let mut gateway = Gateway::new(Arc::new(ModelRegistry::new()), sources);
    if let Some(activator) = build_activator(config) {
        gateway = gateway.with_activator(activator);
    }
    gateway.reload().await;
    serve_gateway(gateway, bind.unwrap_or(config.bind_address())).await
}

/// Bind the axum server for `gateway` and serve it on a spawned task.
///
/// Call `handle.shutdown()` to stop it.
pub async fn serve_gateway(gateway: Gateway, bind: &str) -> Result<ServeHandle> {
    let app = router(gateway);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    let port = listener.local_addr()?.port();
    tracing::info!("gateway listening on {bind} (port {port})");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let join = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("received shutdown signal");
            })
            .await
    });

    Ok(ServeHandle {
        port,
        shutdown_tx: Some(shutdown_tx),
        join: Some(join),
    })
}
