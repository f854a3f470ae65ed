// ABOUTME: Server binary for the MCP OAuth broker
// ABOUTME: Loads config, connects storage, spawns background tasks, serves HTTP
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

//! MCP OAuth broker server
//!
//! Configuration is environment-driven (see `config::environment`); the
//! only CLI flags are overrides useful during development.

use anyhow::{Context, Result};
use clap::Parser;
use mcp_oauth_broker::config::ServerConfig;
use mcp_oauth_broker::context::ServerResources;
use mcp_oauth_broker::database_plugins::{Database, DatabaseProvider};
use mcp_oauth_broker::logging::{init_logging, LoggingConfig};
use mcp_oauth_broker::routes;
use mcp_oauth_broker::sweeper::ExpirySweeper;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// OAuth 2.1 broker for MCP clients
#[derive(Parser, Debug)]
#[command(name = "mcp-oauth-broker", version)]
struct Args {
    /// HTTP port to listen on (overrides HTTP_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env().context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.http_port = port;
    }

    init_logging(&LoggingConfig::from_env(&config.log_level))?;

    let database_url = args
        .database_url
        .unwrap_or_else(|| config.database.url.to_connection_string());
    let database = Database::new(&database_url)
        .await
        .context("Failed to initialize database")?;
    info!(backend = database.backend_info(), "Database ready");

    let resources = Arc::new(ServerResources::new(database, config));
    let config = Arc::clone(&resources.config);

    // Warm the JWKS cache before accepting traffic; a cold failure here is
    // tolerated (the per-request path retries) but worth a loud warning.
    if let Err(e) = resources.jwks.refresh().await {
        tracing::warn!(error = %e, "Initial JWKS fetch failed; verification will retry per-request");
    }
    let jwks_task = resources
        .jwks
        .spawn_refresh(Duration::from_secs(config.broker.jwks_refresh_secs));

    let sweeper_task = ExpirySweeper::new(
        Arc::clone(&resources.database),
        config.broker.pending_auth_ttl_secs,
        config.broker.auth_code_ttl_secs,
        config.broker.sweep_interval_secs,
    )
    .spawn();

    let app = routes::router(&resources)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;

    info!(
        addr = %bind_addr,
        public_url = %config.public_url,
        upstream_issuer = %config.upstream.issuer,
        "MCP OAuth broker listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Background tasks hold no state worth draining
    jwks_task.abort();
    sweeper_task.abort();
    info!("Shutdown complete");

    Ok(())
}

/// Resolve when the process receives a shutdown request
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("Failed to install ctrl-c handler; running until killed");
        std::future::pending::<()>().await;
    }
}
