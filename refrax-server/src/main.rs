//! # Refrax Server
//!
//! On-the-fly media transformation service: request a derived variant of a
//! stored image or video through a URL that encodes the transformation, and
//! the service resolves, produces, caches, and returns the bytes.
//!
//! ## Architecture
//!
//! The server is built on Axum and uses:
//! - an S3-compatible object store (or a local directory) for originals and
//!   the remote cache tier
//! - PostgreSQL for the durable video job queue
//! - the external ffmpeg/ffprobe binaries for video work
//! - the `image` crate plus WebP/AVIF encoders for the image optimizer

/// API-key verification middleware.
pub mod auth;

/// Error types and HTTP translation.
pub mod errors;

/// Request handlers.
pub mod handlers;

/// App state and startup wiring.
pub mod infra;

/// Route assembly.
pub mod routes;

#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use refrax_config::Config;

/// Command line arguments for the refrax media server
#[derive(Parser, Debug)]
#[command(name = "refrax-server")]
#[command(about = "On-the-fly media transformation service")]
struct Args {
    /// Bind address (overrides configuration)
    #[arg(long, env = "REFRAX_BIND_ADDR")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "refrax_server=info,refrax_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env().context("configuration invalid")?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    let bind_addr = config.server.bind_addr.clone();

    let (state, workers) = infra::startup::build_state(config).await?;

    let worker_handle = workers.as_ref().map(|pool| {
        info!(concurrency = pool.concurrency(), "starting video workers");
        pool.clone().start()
    });

    let router = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "refrax server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(handle) = worker_handle {
        handle.abort();
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
