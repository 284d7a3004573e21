use std::sync::Arc;

use anyhow::{Context, Result};
use arker_archive::tracker_hosts;
use arker_common::Config;
use arker_queue::{crash_recovery, run_sweepers, WorkerPool};
use arker_socks5::{ForwarderConfig, Socks5Forwarder};
use arker_store::{BlobStore, FsBlobStore};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod auth;
mod routes;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("starting arker-server");

    let mut config = Config::from_env();
    config.log_redacted();

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.db_url)
        .await
        .context("connecting to database")?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("running migrations")?;
    tracing::info!("migrations complete");

    config
        .resolve_session_secret(&pool)
        .await
        .context("resolving session secret")?;

    let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.storage_path.clone()));

    tracker_hosts::ensure_seeded(&pool)
        .await
        .context("seeding tracker hosts")?;
    let hosts = tracker_hosts::load(&pool).await.context("loading tracker hosts")?;

    if let Some(upstream) = &config.socks5_proxy {
        let forwarder_config = ForwarderConfig::new(upstream).context("parsing SOCKS5_PROXY")?;
        let forwarder = Arc::new(Socks5Forwarder::new(forwarder_config));
        let f = forwarder.clone();
        tokio::spawn(async move {
            if let Err(e) = f.start().await {
                tracing::error!(error = %e, "socks5 forwarder exited");
            }
        });
        tracing::info!("socks5 forwarder starting");
    }

    crash_recovery(&pool).await.context("crash recovery")?;

    let worker_pool = Arc::new(WorkerPool::new(
        pool.clone(),
        store.clone(),
        hosts,
        config.socks5_proxy.as_ref().map(|_| "socks5h://127.0.0.1:7777".to_string()),
        config.max_workers,
    ));
    worker_pool.spawn();

    let sweeper_cancel = worker_pool.cancel_token();
    tokio::spawn(run_sweepers(pool.clone(), sweeper_cancel));

    let app_state = routes::AppState {
        pool: pool.clone(),
        store,
    };
    let router = routes::build_router(app_state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router).await.context("serving")?;

    Ok(())
}
