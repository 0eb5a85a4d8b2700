use anyhow::Result;
use axum::Router;
use object_proxy::{
    config::AppConfig,
    routes::routes::routes,
    services::{
        blob_store::BlobStore,
        metadata_cache::MetadataCache,
        object_store_backend::ObjectStoreBlobStore,
        proxy_service::ProxyService,
        sweeper::ExpirySweeper,
    },
    state::{AppState, ServiceCredential},
};
use std::{io::ErrorKind, sync::Arc};
use tokio::{net::TcpListener, signal, sync::watch};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env_and_args()?;
    tracing::info!("Starting object-proxy with config: {:?}", cfg);
    if cfg.uses_memory_store() {
        tracing::warn!("Using the in-memory blob store; files are lost on restart");
    }

    // --- Storage + shared cache ---
    let store: Arc<dyn BlobStore> = Arc::new(ObjectStoreBlobStore::from_url(
        &cfg.blob_store_url,
        cfg.s3_endpoint.as_deref(),
    )?);
    let cache = Arc::new(MetadataCache::new(
        cfg.metadata_cache_capacity,
        cfg.metadata_cache_ttl(),
    ));
    let proxy = ProxyService::new(store.clone(), cache.clone());

    // --- Expiry sweeper ---
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let mut sweeper = ExpirySweeper::new(store, cache, cfg.sweep_interval(), shutdown_rx);
    let sweeper_task = tokio::spawn(async move {
        tracing::info!("starting expiry sweeper");
        if let Err(err) = sweeper.start().await {
            tracing::error!(error = ?err, "expiry sweeper stopped with error");
        }
    });

    // --- Build router ---
    let state = AppState::new(proxy, ServiceCredential::new(cfg.api_key.as_str()));
    let app: Router = routes(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(());
    if let Err(err) = sweeper_task.await {
        tracing::warn!(error = %err, "expiry sweeper task did not finish cleanly");
    }
    tracing::info!("server stopped");

    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("signal received, shutting down server gracefully");
}
