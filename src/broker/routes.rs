// ABOUTME: OAuth 2.0 HTTP route handlers for the broker endpoints
// ABOUTME: Registration, authorization, upstream callback, token exchange, and discovery
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

use super::endpoints::{AuthorizeRejection, CallbackOutcome};
use super::models::{AuthorizeRequest, CallbackParams, ClientRegistrationRequest, OAuthError, TokenRequest};
use crate::context::ServerResources;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use std::collections::HashMap;
use std::sync::Arc;

/// OAuth 2.0 broker routes
pub struct OAuthRoutes;

impl OAuthRoutes {
    /// Create all broker routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/register", post(Self::handle_register))
            .route(
                "/authorize",
                get(Self::handle_authorize_get).post(Self::handle_authorize_post),
            )
            .route("/auth/callback", get(Self::handle_callback))
            .route("/token", post(Self::handle_token))
            .route(
                "/.well-known/oauth-authorization-server",
                get(Self::handle_authorization_server_metadata),
            )
            .route(
                "/.well-known/oauth-protected-resource",
                get(Self::handle_protected_resource_metadata),
            )
            .route(
                "/.well-known/oauth-protected-resource/mcp",
                get(Self::handle_protected_resource_metadata),
            )
            .with_state(resources)
    }

    /// Handle client registration (POST /register, RFC 7591)
    async fn handle_register(
        State(resources): State<Arc<ServerResources>>,
        Json(request): Json<ClientRegistrationRequest>,
    ) -> Response {
        match resources.broker.registry().register_client(request).await {
            Ok(response) => {
                tracing::info!(client_id = %response.client_id, "OAuth client registered");
                (StatusCode::CREATED, Json(response)).into_response()
            }
            Err(error) => oauth_error_response(&error),
        }
    }

    /// Handle authorization request (GET /authorize)
    async fn handle_authorize_get(
        State(resources): State<Arc<ServerResources>>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        Self::handle_authorize(resources, params).await
    }

    /// Handle authorization request (POST /authorize, form-encoded)
    async fn handle_authorize_post(
        State(resources): State<Arc<ServerResources>>,
        Form(params): Form<HashMap<String, String>>,
    ) -> Response {
        Self::handle_authorize(resources, params).await
    }

    /// Shared authorization handling for both methods
    async fn handle_authorize(
        resources: Arc<ServerResources>,
        params: HashMap<String, String>,
    ) -> Response {
        let request = match parse_authorize_request(&params) {
            Ok(request) => request,
            Err(error) => return oauth_error_response(&error),
        };

        match resources.broker.authorize(request).await {
            // OAuth 2.0 requires a 302 redirect to the upstream IdP
            Ok(upstream_url) => redirect_response(&upstream_url),
            Err(AuthorizeRejection::Redirect {
                redirect_uri,
                error,
                state,
            }) => {
                // The client checked out; deliver the failure through its
                // own redirect URI so the flow terminates cleanly
                let url = super::endpoints::error_redirect_url(
                    &redirect_uri,
                    &error,
                    state.as_deref(),
                );
                redirect_response(&url)
            }
            Err(AuthorizeRejection::Direct(error)) => oauth_error_response(&error),
        }
    }

    /// Handle the upstream IdP redirect (GET /auth/callback)
    async fn handle_callback(
        State(resources): State<Arc<ServerResources>>,
        Query(params): Query<CallbackParams>,
    ) -> Response {
        match resources.broker.handle_callback(params).await {
            CallbackOutcome::RedirectToClient(url) => redirect_response(&url),
            CallbackOutcome::Failed(error) => oauth_error_response(&error),
        }
    }

    /// Handle token request (POST /token, form-encoded)
    async fn handle_token(
        State(resources): State<Arc<ServerResources>>,
        Form(form): Form<HashMap<String, String>>,
    ) -> Response {
        tracing::debug!(
            grant_type = form.get("grant_type").map_or("missing", |v| v),
            client_id = form.get("client_id").map_or("missing", |v| v),
            "OAuth token request received"
        );

        let request = match parse_token_request(&form) {
            Ok(request) => request,
            Err(error) => return oauth_error_response(&error),
        };

        let client_id = request.client_id.clone();
        match resources.broker.token(request).await {
            Ok(response) => {
                tracing::info!(client_id = %client_id, "OAuth token exchange successful");
                (StatusCode::OK, Json(response)).into_response()
            }
            Err(error) => {
                tracing::warn!(
                    client_id = %client_id,
                    error = %error.error,
                    "OAuth token exchange failed"
                );
                oauth_error_response(&error)
            }
        }
    }

    /// OAuth 2.0 authorization server metadata (RFC 8414)
    async fn handle_authorization_server_metadata(
        State(resources): State<Arc<ServerResources>>,
    ) -> Json<serde_json::Value> {
        let issuer = &resources.config.public_url;
        Json(serde_json::json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/authorize"),
            "token_endpoint": format!("{issuer}/token"),
            "registration_endpoint": format!("{issuer}/register"),
            "grant_types_supported": ["authorization_code", "refresh_token"],
            "response_types_supported": ["code"],
            "token_endpoint_auth_methods_supported": ["none"],
            "scopes_supported": resources.config.broker.scopes_supported,
            "response_modes_supported": ["query"],
            "code_challenge_methods_supported": ["S256"]
        }))
    }

    /// OAuth protected resource metadata for MCP discovery
    async fn handle_protected_resource_metadata(
        State(resources): State<Arc<ServerResources>>,
    ) -> Json<serde_json::Value> {
        let issuer = &resources.config.public_url;
        Json(serde_json::json!({
            "resource": format!("{issuer}/mcp"),
            "authorization_servers": [issuer],
            "scopes_supported": resources.config.broker.scopes_supported,
            "bearer_methods_supported": ["header"]
        }))
    }
}

/// Build a 302 redirect response
fn redirect_response(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_owned())]).into_response()
}

/// Serialize an OAuth error as a JSON response with its protocol status
fn oauth_error_response(error: &OAuthError) -> Response {
    (error.http_status(), Json(error.clone())).into_response()
}

/// Parse query/form parameters into an `AuthorizeRequest`
fn parse_authorize_request(
    params: &HashMap<String, String>,
) -> Result<AuthorizeRequest, OAuthError> {
    let response_type = params
        .get("response_type")
        .ok_or_else(|| OAuthError::invalid_request("Missing response_type parameter"))?
        .clone();
    let client_id = params
        .get("client_id")
        .ok_or_else(|| OAuthError::invalid_request("Missing client_id parameter"))?
        .clone();
    let redirect_uri = params
        .get("redirect_uri")
        .ok_or_else(|| OAuthError::invalid_request("Missing redirect_uri parameter"))?
        .clone();

    Ok(AuthorizeRequest {
        response_type,
        client_id,
        redirect_uri,
        scope: params.get("scope").cloned(),
        state: params.get("state").cloned(),
        code_challenge: params.get("code_challenge").cloned(),
        code_challenge_method: params.get("code_challenge_method").cloned(),
        resource: params.get("resource").cloned(),
    })
}

/// Parse form data into a `TokenRequest`
///
/// MCP clients are public clients: `client_id` identifies the caller and
/// PKCE authenticates the grant; there is no client secret.
fn parse_token_request(form: &HashMap<String, String>) -> Result<TokenRequest, OAuthError> {
    let grant_type = form
        .get("grant_type")
        .ok_or_else(|| OAuthError::invalid_request("Missing grant_type parameter"))?
        .clone();
    let client_id = form
        .get("client_id")
        .ok_or_else(|| OAuthError::invalid_request("Missing client_id parameter"))?
        .clone();

    Ok(TokenRequest {
        grant_type,
        code: form.get("code").cloned(),
        redirect_uri: form.get("redirect_uri").cloned(),
        client_id,
        code_verifier: form.get("code_verifier").cloned(),
        refresh_token: form.get("refresh_token").cloned(),
        scope: form.get("scope").cloned(),
        resource: form.get("resource").cloned(),
    })
}
