// ABOUTME: Request middleware modules
// ABOUTME: Bearer authentication for protected MCP requests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

/// Bearer token authentication middleware
pub mod auth;

pub use auth::BearerAuthMiddleware;
