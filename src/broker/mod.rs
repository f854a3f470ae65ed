// ABOUTME: OAuth 2.1 broker - registration, protocol logic, and HTTP routes
// ABOUTME: Implements the local-broker strategy with PKCE and single-use codes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

/// RFC 7591 dynamic client registration and mode-aware client lookup
pub mod client_registration;
/// Broker protocol operations (authorize, callback, exchange, refresh)
pub mod endpoints;
/// OAuth 2.0 wire models and error responses
pub mod models;
/// HTTP route handlers for the broker endpoints
pub mod routes;

pub use client_registration::{ClientLookup, ClientRegistrationManager, ClientValidationMode};
pub use endpoints::{AuthorizeRejection, CallbackOutcome, OAuthBroker};
pub use models::{
    AuthorizeRequest, CallbackParams, ClientRegistrationRequest, ClientRegistrationResponse,
    OAuthError, TokenRequest, TokenResponse,
};
pub use routes::OAuthRoutes;
