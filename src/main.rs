//! mail-forward-rs: resolve a mailbox message from metadata and forward it
//!
//! This service accepts loose identifying metadata (subject, recipients, a
//! body snippet, a receive timestamp or a legacy item id), locates exactly one
//! message through the Microsoft Graph mail API, forwards a copy of it and
//! archives the original. The caller's bearer token is passed through to
//! Graph on every call.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and HTTP serving
//! - [`config`]: Environment-driven server configuration
//! - [`errors`]: Application error model with HTTP status mapping
//! - [`criteria`]: Request normalization and resolution policy presets
//! - [`filter`]: Conjunctive OData filter construction and literal escaping
//! - [`graph`]: Mail backend trait and the Graph REST client
//! - [`resolver`]: Candidate query, local validation and selection
//! - [`forward`]: Draft, attachment copy, send and archive sequence
//! - [`server`]: HTTP handlers and the response envelope
//! - [`models`]: Request/response DTOs and backend-neutral mail types
//! - [`message_id`]: Opaque message and legacy id validation

mod config;
mod criteria;
mod errors;
mod filter;
mod forward;
mod graph;
mod message_id;
#[cfg(test)]
mod mock;
mod models;
mod resolver;
mod server;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use config::ServerConfig;
use graph::GraphClient;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command line overrides; everything else comes from the environment
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Listen address, overrides MAIL_FORWARD_BIND_ADDR
    #[arg(long)]
    bind: Option<SocketAddr>,
}

/// Application entry point
///
/// Initializes tracing from environment, loads config, and serves HTTP until
/// Ctrl-C or SIGTERM.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// MAIL_FORWARD_MAILBOX=ops@contoso.com \
/// MAIL_FORWARD_RESOLVER_STRATEGY=subject_time \
/// cargo run -- --bind 0.0.0.0:7071
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load_from_env()?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    let backend = Arc::new(GraphClient::new(&config)?);
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        addr = %listener.local_addr()?,
        mailbox = %config.mailbox,
        archive_folder = %config.archive_folder,
        "listening"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let app = server::router(server::AppState::new(config, backend)?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("server stopped");
    Ok(())
}

/// Cancel `token` on Ctrl-C or, on unix, SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
    token.cancel();
}
