// ABOUTME: Data models for persisted OAuth broker state and the derived auth context
// ABOUTME: Registered clients, pending authorizations, authorization codes, and AuthContext
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

//! Persisted entities owned by the broker's storage layer, plus the
//! request-scoped [`AuthContext`] produced by bearer verification.
//!
//! These three persisted types are the *only* place OAuth protocol state
//! lives. The broker keeps nothing in process memory, since the instance
//! serving a request may not be the one that created the pending state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A dynamically registered OAuth client (RFC 7591)
///
/// Created on registration, immutable thereafter, never expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredClient {
    /// Unique client identifier, assigned at registration
    pub client_id: String,
    /// Absolute redirect URIs registered for the authorization code flow
    pub redirect_uris: Vec<String>,
    /// Optional human-readable client name
    pub client_name: Option<String>,
    /// Grant types the client may use
    pub grant_types: Vec<String>,
    /// Response types the client may use
    pub response_types: Vec<String>,
    /// Scopes the client may request
    pub scope: Option<String>,
    /// Token endpoint authentication method ("none" for public PKCE clients)
    pub token_endpoint_auth_method: String,
    /// When the client was registered
    pub created_at: DateTime<Utc>,
}

/// A short-lived, single-use record for one in-flight authorization attempt
///
/// Created when a client starts an authorization request, consumed exactly
/// once when the upstream IdP redirects back. The `pending_id` travels to
/// the upstream IdP inside its `state` parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAuthorization {
    /// Unique, random, unguessable identifier
    pub pending_id: String,
    /// The client that started the attempt
    pub client_id: String,
    /// The client's callback URI
    pub redirect_uri: String,
    /// PKCE S256 code challenge supplied by the client
    pub code_challenge: String,
    /// Opaque client-supplied state, echoed back on completion
    pub state: Option<String>,
    /// Scopes the client requested
    pub scopes: Option<String>,
    /// Optional target resource URI (RFC 8707)
    pub resource: Option<String>,
    /// When the attempt was started
    pub created_at: DateTime<Utc>,
}

/// A short-lived, single-use broker-issued authorization code
///
/// Binds the broker's own code (distinct from any upstream code) to the
/// upstream tokens obtained on the user's behalf, plus the PKCE challenge
/// and redirect URI needed to validate the eventual exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// Unique, random, unguessable broker-issued code
    pub code: String,
    /// The client the code was issued to
    pub client_id: String,
    /// PKCE challenge copied from the originating pending authorization
    pub code_challenge: String,
    /// Redirect URI the code was delivered to (RFC 6749 §4.1.3 binding)
    pub redirect_uri: String,
    /// Upstream access token released on successful exchange
    pub access_token: String,
    /// Upstream refresh token, when the IdP issued one
    pub refresh_token: Option<String>,
    /// When the code was minted
    pub created_at: DateTime<Utc>,
}

/// Authenticated request context derived from a verified bearer token
///
/// Produced fresh on every protected request; never cached across requests.
#[derive(Debug, Clone, Serialize)]
pub struct AuthContext {
    /// End-user or machine-client identifier (`sub` claim)
    pub subject: String,
    /// Organization the subject belongs to, when present
    pub organization_id: Option<String>,
    /// Whether the token came from a client-credentials (machine) grant
    pub is_machine_to_machine: bool,
    /// The subject's email, when present
    pub email: Option<String>,
    /// Granted scopes (split from the space-delimited `scope` claim)
    pub scopes: Vec<String>,
    /// When the token expires
    pub token_expiry: DateTime<Utc>,
}

impl AuthContext {
    /// Check whether the context carries a given scope
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}
