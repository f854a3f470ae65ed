// ABOUTME: OAuth 2.0 wire models for registration, authorization, and token exchange
// ABOUTME: Implements RFC 7591 and OAuth 2.0 request/response structures
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// OAuth 2.0 Client Registration Request (RFC 7591)
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRegistrationRequest {
    /// Client-proposed identifier; assigned by the broker when absent
    pub client_id: Option<String>,
    /// Redirect URIs for authorization code flow
    pub redirect_uris: Vec<String>,
    /// Optional client name for display
    pub client_name: Option<String>,
    /// Optional client URI for information
    pub client_uri: Option<String>,
    /// Grant types the client can use
    pub grant_types: Option<Vec<String>>,
    /// Response types the client can use
    pub response_types: Option<Vec<String>>,
    /// Scopes the client can request
    pub scope: Option<String>,
    /// Token endpoint authentication method; MCP clients are public
    /// clients and register with "none"
    pub token_endpoint_auth_method: Option<String>,
}

/// OAuth 2.0 Client Registration Response (RFC 7591)
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientRegistrationResponse {
    /// Unique client identifier
    pub client_id: String,
    /// When the client id was issued (unix seconds)
    pub client_id_issued_at: i64,
    /// Redirect URIs registered for this client
    pub redirect_uris: Vec<String>,
    /// Grant types allowed for this client
    pub grant_types: Vec<String>,
    /// Response types allowed for this client
    pub response_types: Vec<String>,
    /// Client name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    /// Client URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,
    /// Scopes this client can request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Token endpoint authentication method
    pub token_endpoint_auth_method: String,
}

/// OAuth 2.0 Authorization Request
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeRequest {
    /// Response type (only "code" is supported)
    pub response_type: String,
    /// Client identifier
    pub client_id: String,
    /// Redirect URI for the response
    pub redirect_uri: String,
    /// Requested scopes
    pub scope: Option<String>,
    /// Opaque state parameter for CSRF protection, echoed back unchanged
    pub state: Option<String>,
    /// PKCE code challenge (RFC 7636)
    pub code_challenge: Option<String>,
    /// PKCE code challenge method (only S256 is accepted)
    pub code_challenge_method: Option<String>,
    /// Target resource URI (RFC 8707)
    pub resource: Option<String>,
}

/// Query parameters delivered by the upstream IdP to the callback endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackParams {
    /// Upstream authorization code on success
    pub code: Option<String>,
    /// The broker's `pending_id`, round-tripped through the upstream state
    pub state: Option<String>,
    /// Upstream error code on failure
    pub error: Option<String>,
    /// Upstream error description on failure
    pub error_description: Option<String>,
}

/// OAuth 2.0 Token Request
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    /// Grant type (`authorization_code` or `refresh_token`)
    pub grant_type: String,
    /// Authorization code (for `authorization_code` grant)
    pub code: Option<String>,
    /// Redirect URI (must match the one the code was issued to)
    pub redirect_uri: Option<String>,
    /// Client ID
    pub client_id: String,
    /// PKCE code verifier (RFC 7636, for `authorization_code` grant)
    pub code_verifier: Option<String>,
    /// Refresh token (for `refresh_token` grant)
    pub refresh_token: Option<String>,
    /// Requested scopes
    pub scope: Option<String>,
    /// Target resource URI (RFC 8707); accepted and ignored
    pub resource: Option<String>,
}

/// OAuth 2.0 Token Response
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token issued by the upstream IdP
    pub access_token: String,
    /// Token type (always "Bearer")
    pub token_type: String,
    /// Expires in seconds, when the upstream reported one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    /// Scopes granted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Refresh token (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// OAuth 2.0 Error Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthError {
    /// Error code
    pub error: String,
    /// Human-readable error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    /// URI for error information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

impl OAuthError {
    /// Create an `invalid_request` error
    #[must_use]
    pub fn invalid_request(description: &str) -> Self {
        Self {
            error: "invalid_request".to_owned(),
            error_description: Some(description.to_owned()),
            error_uri: Some(
                "https://datatracker.ietf.org/doc/html/rfc6749#section-4.1.2.1".to_owned(),
            ),
        }
    }

    /// Create an `invalid_client` error
    #[must_use]
    pub fn invalid_client() -> Self {
        Self {
            error: "invalid_client".to_owned(),
            error_description: Some("Client authentication failed".to_owned()),
            error_uri: Some("https://datatracker.ietf.org/doc/html/rfc6749#section-5.2".to_owned()),
        }
    }

    /// Create an `invalid_grant` error
    #[must_use]
    pub fn invalid_grant(description: &str) -> Self {
        Self {
            error: "invalid_grant".to_owned(),
            error_description: Some(description.to_owned()),
            error_uri: Some("https://datatracker.ietf.org/doc/html/rfc6749#section-5.2".to_owned()),
        }
    }

    /// Create an `unsupported_grant_type` error
    #[must_use]
    pub fn unsupported_grant_type() -> Self {
        Self {
            error: "unsupported_grant_type".to_owned(),
            error_description: Some("Grant type not supported".to_owned()),
            error_uri: Some("https://datatracker.ietf.org/doc/html/rfc6749#section-5.2".to_owned()),
        }
    }

    /// Create an `unsupported_response_type` error (RFC 6749 §4.1.2.1)
    #[must_use]
    pub fn unsupported_response_type() -> Self {
        Self {
            error: "unsupported_response_type".to_owned(),
            error_description: Some("Only the 'code' response type is supported".to_owned()),
            error_uri: Some(
                "https://datatracker.ietf.org/doc/html/rfc6749#section-4.1.2.1".to_owned(),
            ),
        }
    }

    /// Create an `access_denied` error (the user or upstream IdP refused)
    #[must_use]
    pub fn access_denied(description: &str) -> Self {
        Self {
            error: "access_denied".to_owned(),
            error_description: Some(description.to_owned()),
            error_uri: None,
        }
    }

    /// Create a `server_error` error
    #[must_use]
    pub fn server_error(description: &str) -> Self {
        Self {
            error: "server_error".to_owned(),
            error_description: Some(description.to_owned()),
            error_uri: None,
        }
    }

    /// Create a `temporarily_unavailable` error (dependency outage)
    #[must_use]
    pub fn temporarily_unavailable(description: &str) -> Self {
        Self {
            error: "temporarily_unavailable".to_owned(),
            error_description: Some(description.to_owned()),
            error_uri: None,
        }
    }

    /// HTTP status for this error when delivered as a JSON body
    ///
    /// Dependency outages map to 5xx so callers can distinguish "retry
    /// later" from "this grant is dead"; everything else follows RFC 6749.
    #[must_use]
    pub fn http_status(&self) -> StatusCode {
        match self.error.as_str() {
            "invalid_client" => StatusCode::UNAUTHORIZED,
            "temporarily_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            "server_error" => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
