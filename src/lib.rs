// ABOUTME: Main library entry point for the MCP OAuth broker
// ABOUTME: Brokers OAuth 2.1 PKCE flows between MCP clients and an upstream OIDC identity provider
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

#![deny(unsafe_code)]

//! # MCP OAuth Broker
//!
//! An OAuth 2.1 authorization broker that sits between MCP clients
//! (Claude Desktop, ChatGPT, and other connectors) and an upstream
//! OpenID Connect identity provider. The broker terminates the client-facing
//! flow (RFC 7591 dynamic registration, PKCE authorization code, token
//! exchange) while itself acting as an OAuth client toward the upstream IdP,
//! and validates bearer JWTs against the upstream JWKS on every protected
//! MCP request.
//!
//! ## Architecture
//!
//! - **Broker**: `authorize`, callback handling, PKCE challenge recovery,
//!   and atomic single-use code exchange
//! - **Storage**: pending authorizations, authorization codes, and client
//!   registrations in a shared relational store (SQLite or PostgreSQL),
//!   so any process instance can serve any request
//! - **Upstream**: OIDC peer client for code and refresh-token exchange
//! - **Verifier**: per-request JWT validation against a cached remote JWKS
//!
//! All in-flight OAuth state lives in the database; the only atomicity the
//! broker relies on is single-statement `DELETE ... RETURNING` consumption.

/// Bearer token verification against the upstream JWKS
pub mod auth;

/// OAuth 2.1 broker protocol logic, registration, and HTTP routes
pub mod broker;

/// Environment-based configuration management
pub mod config;

/// Application constants and operational defaults
pub mod constants;

/// Shared server resources (composition root)
pub mod context;

/// Database abstraction with SQLite and PostgreSQL backends
pub mod database_plugins;

/// Unified error handling system
pub mod errors;

/// Remote JWKS fetching and caching
pub mod jwks;

/// JSON-RPC 2.0 request/response types for the MCP endpoint
pub mod jsonrpc;

/// Logging configuration and structured logging setup
pub mod logging;

/// Request authentication middleware
pub mod middleware;

/// Data models for persisted OAuth state and derived auth context
pub mod models;

/// HTTP routes for the protected MCP endpoint and health checks
pub mod routes;

/// Periodic expiry sweep for pending authorizations and codes
pub mod sweeper;

/// Upstream identity provider client
pub mod upstream;

/// Shared utilities (HTTP clients)
pub mod utils;
