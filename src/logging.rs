// ABOUTME: Logging configuration and structured logging setup for observability
// ABOUTME: Configures log levels, formatters, and output destinations
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

//! Production-ready logging configuration with structured output

use crate::config::LogLevel;
use crate::constants::service_names;
use anyhow::Result;
use std::env;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    /// `JSON` format for production logging
    Json,
    /// Pretty format for development
    Pretty,
    /// Compact format for space-constrained environments
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty, compact)
    pub format: LogFormat,
    /// Service name for structured logging
    pub service_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Pretty,
            service_name: service_names::BROKER.into(),
        }
    }
}

impl LoggingConfig {
    /// Build a logging configuration from the environment
    ///
    /// `LOG_FORMAT=json|pretty|compact` selects the formatter; the level
    /// comes from the parsed server config (overridable via `RUST_LOG`).
    #[must_use]
    pub fn from_env(level: &LogLevel) -> Self {
        let format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") => LogFormat::Compact,
            _ => LogFormat::Pretty,
        };
        Self {
            level: level.to_string(),
            format,
            service_name: service_names::BROKER.into(),
        }
    }
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level, so operators can
/// raise verbosity per-module without a restart-and-reconfigure cycle.
///
/// # Errors
/// Returns an error if a subscriber is already installed
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    match config.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .try_init()?;
        }
    }

    tracing::info!(
        service = %config.service_name,
        level = %config.level,
        "Logging initialized"
    );
    Ok(())
}
