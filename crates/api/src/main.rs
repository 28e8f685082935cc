mod config;
mod error;
mod handlers;
mod middleware;
mod models;
mod repos;
mod services;
mod state;
mod stores;
#[cfg(test)]
mod test_utils;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{Router, http};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    config::Config,
    repos::{PgAccessLogRepo, PgAccountRepo, PgDropRepo, PgQuotaRepo, Repos},
    services::{EmailSenderImpl, Reclaimer, S3BlobStore},
    state::AppState,
    stores::{MemoryOtpStore, RedisOtpStore, RedisRateLimiter, Stores},
};

#[derive(Parser)]
#[command(name = "api")]
#[command(about = "sealbox API server")]
struct Args {
    /// Run database migrations and exit
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider before any TLS operations
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args = Args::parse();
    let config = envy::prefixed("SEALBOX_").from_env::<Config>()?;

    // Initialize Sentry for error tracking (must be done early, guard must stay alive)
    let _sentry_guard = config.sentry_dsn.as_ref().map(|dsn| {
        sentry::init((
            dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(config.env.clone().into()),
                ..Default::default()
            },
        ))
    });

    // Set up tracing: JSON in production, human-readable otherwise
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.is_production() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }

    let database = PgPoolOptions::new()
        .max_connections(25)
        .connect(&config.database_url)
        .await?;

    // Run migrations via init container only (--migrate flag)
    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&database).await?;
        tracing::info!("Migrations complete");
        return Ok(());
    }

    let redis = redis::Client::open(config.redis_url.as_str())?;
    let email = EmailSenderImpl::new(config.resend_api_key.clone(), config.smtp_url.clone())?;
    let blob = S3BlobStore::new(config.blob_bucket.clone()).await;

    let repos = Repos {
        drops: Arc::new(PgDropRepo::new(database.clone())),
        quota: Arc::new(PgQuotaRepo::new(database.clone())),
        access_log: Arc::new(PgAccessLogRepo::new(database.clone())),
        accounts: Arc::new(PgAccountRepo::new(database)),
    };

    // Single-instance deployments can keep OTP entries in-process; the
    // frequency limiter still needs Redis either way.
    let otp: Arc<dyn stores::OtpStore> = match config.otp_backend.as_str() {
        "memory" => Arc::new(MemoryOtpStore::new()),
        _ => Arc::new(RedisOtpStore::new(redis.clone())),
    };
    let stores = Stores {
        otp,
        rate_limiter: Arc::new(RedisRateLimiter::new(redis)),
    };

    let state = AppState {
        config: config.clone(),
        repos,
        stores,
        blob: Arc::new(blob),
        email: Arc::new(email),
    };

    // Background reclamation sweep
    let reclaimer = Arc::new(Reclaimer::from_state(&state));
    tokio::spawn(reclaimer.run(
        Duration::from_secs(config.sweep_interval_secs),
        config.purge_every_sweeps,
    ));

    // Request ID header name
    let x_request_id = http::HeaderName::from_static("x-request-id");

    let app = Router::new()
        .nest("/health", handlers::health::router())
        .nest("/drops", handlers::drops::router())
        .nest("/admin", handlers::admin::router())
        .with_state(state)
        // Request ID: generate UUID, include in logs, return in response
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &http::Request<axum::body::Body>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            },
        ))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .layer(RequestBodyLimitLayer::new(24 * 1024 * 1024)); // 16MB base64 content + JSON framing

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
