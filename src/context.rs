// ABOUTME: Shared server resources for dependency injection
// ABOUTME: Composition root owning the database, broker, verifier, and config
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

//! Shared server resources
//!
//! One `ServerResources` is built at startup and handed to every route as
//! axum state. Everything inside is either `Arc`-shared or cheap to clone;
//! nothing here holds OAuth protocol state (that lives in the database).

use crate::auth::TokenVerifier;
use crate::broker::{ClientRegistrationManager, OAuthBroker};
use crate::config::ServerConfig;
use crate::database_plugins::Database;
use crate::jwks::RemoteJwks;
use crate::middleware::BearerAuthMiddleware;
use crate::upstream::UpstreamClient;
use std::sync::Arc;

/// Focused dependency container for route handlers
pub struct ServerResources {
    /// Shared database handle
    pub database: Arc<Database>,
    /// OAuth broker protocol logic
    pub broker: OAuthBroker,
    /// Bearer authentication middleware
    pub auth_middleware: BearerAuthMiddleware,
    /// JWKS cache (exposed for background refresh)
    pub jwks: Arc<RemoteJwks>,
    /// Server configuration
    pub config: Arc<ServerConfig>,
}

impl ServerResources {
    /// Wire up all components from configuration and a connected database
    #[must_use]
    pub fn new(database: Database, config: ServerConfig) -> Self {
        let database = Arc::new(database);
        let config = Arc::new(config);

        let jwks = Arc::new(RemoteJwks::new(config.upstream.jwks_url.clone()));
        let verifier = Arc::new(TokenVerifier::new(
            Arc::clone(&jwks),
            config.upstream.issuer.clone(),
            config.upstream.expected_audience.clone(),
        ));

        let callback_url = format!("{}/auth/callback", config.public_url);
        let upstream = Arc::new(UpstreamClient::new(
            config.upstream.clone(),
            callback_url,
        ));

        let registry = ClientRegistrationManager::new(
            Arc::clone(&database),
            config.broker.client_validation,
        );
        let broker = OAuthBroker::new(
            Arc::clone(&database),
            registry,
            upstream,
            Arc::clone(&config),
        );

        Self {
            database,
            broker,
            auth_middleware: BearerAuthMiddleware::new(verifier),
            jwks,
            config,
        }
    }

    /// Wire up resources with a pre-built JWKS cache and upstream client
    /// (test support: static key sets and mock IdP endpoints)
    #[must_use]
    pub fn with_overrides(
        database: Database,
        config: ServerConfig,
        jwks: Arc<RemoteJwks>,
        upstream: Arc<UpstreamClient>,
    ) -> Self {
        let database = Arc::new(database);
        let config = Arc::new(config);

        let verifier = Arc::new(TokenVerifier::new(
            Arc::clone(&jwks),
            config.upstream.issuer.clone(),
            config.upstream.expected_audience.clone(),
        ));

        let registry = ClientRegistrationManager::new(
            Arc::clone(&database),
            config.broker.client_validation,
        );
        let broker = OAuthBroker::new(
            Arc::clone(&database),
            registry,
            upstream,
            Arc::clone(&config),
        );

        Self {
            database,
            broker,
            auth_middleware: BearerAuthMiddleware::new(verifier),
            jwks,
            config,
        }
    }
}
