// ABOUTME: Application constants and operational defaults
// ABOUTME: TTLs, sweep intervals, code sizes, and OAuth protocol limits
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

/// Operational limits and default lifetimes
pub mod limits {
    /// How long a pending authorization stays valid while the user
    /// authenticates at the upstream IdP (seconds). A typical login takes
    /// well under five minutes; ten is conservative.
    pub const PENDING_AUTH_TTL_SECS: u64 = 600;

    /// How long a broker-issued authorization code stays redeemable
    /// (seconds). Clients exchange immediately after the redirect.
    pub const AUTH_CODE_TTL_SECS: u64 = 60;

    /// Interval between expiry sweeps (seconds). The sweep is advisory
    /// hygiene; correctness comes from single-use consumption.
    pub const SWEEP_INTERVAL_SECS: u64 = 60;

    /// Interval between background JWKS refreshes (seconds)
    pub const JWKS_REFRESH_SECS: u64 = 300;

    /// Default HTTP listen port
    pub const DEFAULT_HTTP_PORT: u16 = 8080;
}

/// OAuth protocol constants
pub mod oauth {
    /// Random bytes in a broker-issued authorization code or pending id
    /// (256 bits, URL-safe base64 encoded)
    pub const CODE_LENGTH_BYTES: usize = 32;

    /// Minimum PKCE code challenge / verifier length (RFC 7636 §4.1)
    pub const PKCE_MIN_LENGTH: usize = 43;

    /// Maximum PKCE code challenge / verifier length (RFC 7636 §4.1)
    pub const PKCE_MAX_LENGTH: usize = 128;

    /// The only supported PKCE challenge method
    pub const PKCE_METHOD_S256: &str = "S256";

    /// Token type for all issued tokens
    pub const TOKEN_TYPE_BEARER: &str = "Bearer";

    /// Prefix for dynamically registered client ids
    pub const CLIENT_ID_PREFIX: &str = "mcp_client_";

    /// Subject prefix the upstream IdP uses for machine clients
    /// (client-credentials grants)
    pub const MACHINE_SUBJECT_PREFIX: &str = "client_";
}

/// Service names for logs and error messages
pub mod service_names {
    /// This service
    pub const BROKER: &str = "mcp-oauth-broker";

    /// The upstream identity provider as a logged dependency
    pub const UPSTREAM_IDP: &str = "upstream-idp";

    /// The upstream JWKS endpoint as a logged dependency
    pub const UPSTREAM_JWKS: &str = "upstream-jwks";
}
