// ABOUTME: Remote JWKS fetching and caching with background refresh
// ABOUTME: Explicit injected dependency so tests can substitute a static key set
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

//! Remote JSON Web Key Set cache
//!
//! The verifier validates bearer tokens on every protected request, so the
//! key set must come from cache on the hot path. A background task
//! refreshes it periodically; a failed refresh keeps serving the cached
//! set (tokens are short-lived, availability wins), while a cold-cache
//! fetch failure surfaces as a dependency outage - a 5xx-class error
//! distinct from an invalid token.

use crate::constants::service_names;
use crate::errors::{AppError, AppResult};
use crate::utils::http_client::jwks_client;
use jsonwebtoken::jwk::JwkSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Cached remote JSON Web Key Set
///
/// Owned by the process composition root and injected wherever token
/// verification happens; never a hidden module-level global.
pub struct RemoteJwks {
    url: Option<String>,
    client: reqwest::Client,
    cache: RwLock<Option<JwkSet>>,
}

impl RemoteJwks {
    /// Create a remote key set backed by the given JWKS URL
    #[must_use]
    pub fn new(url: String) -> Self {
        Self {
            url: Some(url),
            client: jwks_client(),
            cache: RwLock::new(None),
        }
    }

    /// Create a key set from a static document (tests, offline validation)
    #[must_use]
    pub fn from_static(set: JwkSet) -> Self {
        Self {
            url: None,
            client: jwks_client(),
            cache: RwLock::new(Some(set)),
        }
    }

    /// Get the current key set, fetching on a cold cache
    ///
    /// # Errors
    /// Returns a 5xx-class dependency error when the cache is cold and the
    /// fetch fails
    pub async fn get(&self) -> AppResult<JwkSet> {
        if let Some(cached) = self.cache.read().await.clone() {
            return Ok(cached);
        }

        let fetched = self.fetch().await?;
        *self.cache.write().await = Some(fetched.clone());
        Ok(fetched)
    }

    /// Refresh the cache from the remote URL
    ///
    /// A failed refresh over a warm cache is logged and swallowed; the
    /// cached keys keep serving.
    ///
    /// # Errors
    /// Returns an error only when the cache is cold and the fetch fails
    pub async fn refresh(&self) -> AppResult<()> {
        if self.url.is_none() {
            return Ok(()); // static key set, nothing to refresh
        }

        match self.fetch().await {
            Ok(set) => {
                tracing::debug!(keys = set.keys.len(), "JWKS refreshed");
                *self.cache.write().await = Some(set);
                Ok(())
            }
            Err(e) => {
                if self.cache.read().await.is_some() {
                    tracing::warn!(error = %e, "JWKS refresh failed, serving cached keys");
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Spawn the periodic background refresh task
    ///
    /// The task only keeps the cache warm; it never takes the verifier
    /// down, so errors are logged and the loop continues.
    pub fn spawn_refresh(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let jwks = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = jwks.refresh().await {
                    tracing::warn!(error = %e, "Background JWKS refresh failed");
                }
            }
        })
    }

    /// Fetch the key set from the remote URL
    async fn fetch(&self) -> AppResult<JwkSet> {
        let Some(url) = self.url.as_deref() else {
            return Err(AppError::internal(
                "RemoteJwks has neither a URL nor a static key set",
            ));
        };

        let response = self.client.get(url).send().await.map_err(|e| {
            AppError::external_unavailable(service_names::UPSTREAM_JWKS, e.to_string())
        })?;

        if !response.status().is_success() {
            return Err(AppError::external_service(
                service_names::UPSTREAM_JWKS,
                format!("HTTP {} from JWKS endpoint", response.status()),
            ));
        }

        response.json::<JwkSet>().await.map_err(|e| {
            AppError::external_service(
                service_names::UPSTREAM_JWKS,
                format!("invalid JWKS document: {e}"),
            )
        })
    }
}
