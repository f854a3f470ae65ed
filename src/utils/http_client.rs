// ABOUTME: Shared HTTP client utilities with connection pooling and timeout configuration
// ABOUTME: Provides singleton and configurable HTTP clients to eliminate redundant client creation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

use reqwest::{Client, ClientBuilder};
use std::sync::OnceLock;
use std::time::Duration;

/// Global shared HTTP client with default configuration
static SHARED_CLIENT: OnceLock<Client> = OnceLock::new();

/// Get or create the shared HTTP client with default settings
///
/// This client uses connection pooling and reasonable timeouts.
/// Prefer this over creating new clients for better performance.
pub fn shared_client() -> &'static Client {
    SHARED_CLIENT.get_or_init(|| {
        ClientBuilder::new()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new())
    })
}

/// Create a new HTTP client with custom timeout settings
#[must_use]
pub fn create_client_with_timeout(timeout_secs: u64, connect_timeout_secs: u64) -> Client {
    ClientBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Create a new HTTP client optimized for OAuth flows
///
/// Shorter timeouts than the shared client: token exchanges against the
/// upstream IdP should be fast, and a request handler must not hold its
/// connection open waiting on a slow dependency.
#[must_use]
pub fn oauth_client() -> Client {
    create_client_with_timeout(15, 5) // 15s request timeout, 5s connect timeout
}

/// Create a new HTTP client for JWKS fetches
///
/// JWKS documents are tiny; a fetch that takes longer than a few seconds is
/// a dependency outage, not a slow response.
#[must_use]
pub fn jwks_client() -> Client {
    create_client_with_timeout(10, 5)
}
