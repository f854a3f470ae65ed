// ABOUTME: HTTP route modules and top-level router assembly
// ABOUTME: Combines broker, MCP, and health routes into one axum Router
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

/// Health check routes
pub mod health;
/// Protected MCP endpoint routes
pub mod mcp;

use crate::broker::OAuthRoutes;
use crate::context::ServerResources;
use axum::Router;
use std::sync::Arc;

/// Assemble the full application router
#[must_use]
pub fn router(resources: &Arc<ServerResources>) -> Router {
    Router::new()
        .merge(OAuthRoutes::routes(Arc::clone(resources)))
        .merge(mcp::McpRoutes::routes(Arc::clone(resources)))
        .merge(health::HealthRoutes::routes())
}
