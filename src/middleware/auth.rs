// ABOUTME: MCP authentication middleware for protected request authentication
// ABOUTME: Extracts bearer tokens, verifies per request, and builds 401 challenges
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

use crate::auth::TokenVerifier;
use crate::errors::{AppError, AppResult};
use crate::models::AuthContext;
use axum::http::HeaderMap;
use std::sync::Arc;

/// Middleware for protected MCP request authentication
///
/// Verification happens on every request; nothing is cached across
/// requests, so upstream revocation is observed as soon as a token
/// expires or the key set rotates.
#[derive(Clone)]
pub struct BearerAuthMiddleware {
    verifier: Arc<TokenVerifier>,
}

impl BearerAuthMiddleware {
    /// Create new auth middleware over the shared verifier
    #[must_use]
    pub const fn new(verifier: Arc<TokenVerifier>) -> Self {
        Self { verifier }
    }

    /// Authenticate a request from its headers
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the Authorization header is missing or not a Bearer credential
    /// - token verification fails (signature, issuer, expiry, audience)
    /// - the JWKS dependency is unavailable (5xx-class, not a client error)
    #[tracing::instrument(
        skip(self, headers),
        fields(subject = tracing::field::Empty, success = tracing::field::Empty)
    )]
    pub async fn authenticate_request(&self, headers: &HeaderMap) -> AppResult<AuthContext> {
        let auth_header = headers
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| {
                tracing::Span::current().record("success", false);
                AppError::auth_required()
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            tracing::Span::current().record("success", false);
            AppError::auth_invalid("Authorization header must use the Bearer scheme")
        })?;

        match self.verifier.verify(token).await {
            Ok(context) => {
                tracing::Span::current()
                    .record("subject", context.subject.as_str())
                    .record("success", true);
                Ok(context)
            }
            Err(e) => {
                tracing::Span::current().record("success", false);
                tracing::warn!("Bearer authentication failed: {e}");
                Err(e)
            }
        }
    }
}

/// Build the `WWW-Authenticate` challenge for 401 responses
///
/// Carries `resource_metadata` so MCP clients can discover how to
/// authenticate, per the MCP authorization spec.
#[must_use]
pub fn www_authenticate_challenge(public_url: &str) -> String {
    format!(
        "Bearer error=\"invalid_token\", resource_metadata=\"{public_url}/.well-known/oauth-protected-resource/mcp\""
    )
}
