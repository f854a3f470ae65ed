// ABOUTME: Protected MCP endpoint route handlers
// ABOUTME: Bearer-validated JSON-RPC surface with MCP-compliant 401 challenges
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

//! Protected MCP routes
//!
//! Every request is bearer-validated against the upstream JWKS before any
//! JSON-RPC dispatch. A missing or invalid token answers 401 with a
//! `WWW-Authenticate` challenge carrying `resource_metadata`, per the MCP
//! authorization spec, so clients can discover how to authenticate.
//!
//! Per-subject rate limiting is a generic token bucket and mounts as a
//! tower layer in front of this router; it is not part of this crate.

use crate::context::ServerResources;
use crate::errors::ErrorCode;
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse, ERROR_INVALID_REQUEST, ERROR_METHOD_NOT_FOUND};
use crate::middleware::auth::www_authenticate_challenge;
use crate::models::AuthContext;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;

/// Protected MCP endpoint routes
pub struct McpRoutes;

impl McpRoutes {
    /// Create the protected MCP routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/mcp", post(Self::handle_mcp))
            .with_state(resources)
    }

    /// Handle a protected MCP JSON-RPC request
    async fn handle_mcp(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(request): Json<JsonRpcRequest>,
    ) -> Response {
        let context = match resources.auth_middleware.authenticate_request(&headers).await {
            Ok(context) => context,
            Err(e) => {
                // A JWKS outage is a dependency failure, not the client's
                // token being bad - surface it as 5xx without a challenge
                if !matches!(
                    e.code,
                    ErrorCode::AuthRequired | ErrorCode::AuthInvalid | ErrorCode::AuthExpired
                ) {
                    return e.into_response();
                }
                return unauthorized_response(&resources.config.public_url, &e.to_string());
            }
        };

        Json(Self::dispatch(&request, &context)).into_response()
    }

    /// Dispatch a verified JSON-RPC request
    fn dispatch(request: &JsonRpcRequest, context: &AuthContext) -> JsonRpcResponse {
        if request.jsonrpc != crate::jsonrpc::JSONRPC_VERSION {
            return JsonRpcResponse::error(
                request.id.clone(),
                ERROR_INVALID_REQUEST,
                "jsonrpc must be \"2.0\"",
            );
        }

        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                request.id.clone(),
                serde_json::json!({
                    "protocolVersion": "2025-03-26",
                    "serverInfo": {
                        "name": crate::constants::service_names::BROKER,
                        "version": env!("CARGO_PKG_VERSION")
                    },
                    "capabilities": {}
                }),
            ),
            "ping" => JsonRpcResponse::success(request.id.clone(), serde_json::json!({})),
            "whoami" => JsonRpcResponse::success(
                request.id.clone(),
                serde_json::json!({
                    "subject": context.subject,
                    "organization_id": context.organization_id,
                    "is_machine_to_machine": context.is_machine_to_machine,
                    "scopes": context.scopes
                }),
            ),
            other => JsonRpcResponse::error(
                request.id.clone(),
                ERROR_METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        }
    }
}

/// Build the MCP-spec 401 response with a `WWW-Authenticate` challenge
fn unauthorized_response(public_url: &str, description: &str) -> Response {
    let challenge = www_authenticate_challenge(public_url);
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, challenge)],
        Json(serde_json::json!({
            "error": "invalid_token",
            "error_description": description
        })),
    )
        .into_response()
}
