//! wcs-daemon entry point.
//!
//! This file is intentionally thin: it loads config, bootstraps the
//! instance identity and database pool, starts the publisher worker, wires
//! middleware, and starts the HTTP server. All route handlers live in
//! `routes.rs`; all shared state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};
use wcs_config::CoordinatorConfig;
use wcs_daemon::{routes, state};
use wcs_transport::{IdentityPublishStrategy, InProcessTransport};
use wcs_uow::UnitOfWorkContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // PATCH S1: Load .env.local if present (dev convenience).
    // Silent if the file does not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let (config, loaded) = load_config().context("loading coordinator config")?;
    let secrets = wcs_config::resolve_secrets(&loaded.config_json).context("resolving secrets")?;

    info!(config_hash = %loaded.config_hash, "configuration loaded");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&secrets.database_url)
        .await
        .context("connecting to database")?;
    wcs_db::migrate(&pool).await.context("running migrations")?;

    let instance = wcs_instance::bootstrap("wcs-daemon", &pool)
        .await
        .context("bootstrapping service instance")?;
    info!(instance_id = %instance.instance_id, "instance bootstrapped");

    let ctx = UnitOfWorkContext {
        instance_id: instance.instance_id.into(),
        service_name: instance.service_name.clone(),
        host: instance.host.clone(),
        process_id: instance.process_id,
        lease_duration_s: config.lease_seconds,
        partition_count: config.partition_count,
        stale_threshold_s: config.stale_threshold_seconds,
        max_delivery_attempts: config.max_delivery_attempts,
    };

    let readiness = Arc::new(wcs_instance::PgReadinessCheck::new(pool.clone()));
    let transport = Arc::new(InProcessTransport::new());
    let strategy = Arc::new(IdentityPublishStrategy);

    let worker = wcs_runtime::PublisherWorker::new(
        pool.clone(),
        ctx,
        readiness,
        transport,
        strategy,
        wcs_runtime::PublisherWorkerConfig {
            polling_interval: Duration::from_millis(config.polling_interval_ms),
            lease_duration_s: config.lease_seconds,
            partition_count: config.partition_count,
            stale_threshold_s: config.stale_threshold_seconds,
            stream: wcs_runtime::StreamProcessorConfig {
                max_concurrent_streams: config.max_concurrent_streams,
                parallelize_streams: config.parallelize_streams,
            },
            debug_mode: config.debug_mode,
            ..Default::default()
        },
    );

    let cancellation = tokio_util::sync::CancellationToken::new();
    let handle = worker.spawn(cancellation.clone());

    let shared = Arc::new(state::AppState::new(
        instance.instance_id,
        instance.service_name.clone(),
        pool,
        handle.metrics.clone(),
    ));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("wcs-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal(cancellation.clone()))
        .await
        .context("server crashed")?;

    handle.coordinator.await.ok();
    handle.publisher.await.ok();

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Loads the §6 config keys from the YAML layers named in `WCS_CONFIG_PATHS`
/// (comma-separated), or from an empty document (defaults only) when unset.
fn load_config() -> anyhow::Result<(CoordinatorConfig, wcs_config::LoadedConfig)> {
    let loaded = match std::env::var("WCS_CONFIG_PATHS") {
        Ok(raw) => {
            let paths: Vec<&str> = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
            wcs_config::load_layered_yaml(&paths)?
        }
        Err(_) => wcs_config::load_layered_yaml_from_strings(&["{}"])?,
    };
    let config = CoordinatorConfig::from_loaded(&loaded)?;
    Ok((config, loaded))
}

async fn shutdown_signal(cancellation: tokio_util::sync::CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining publisher worker");
    cancellation.cancel();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("WCS_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
