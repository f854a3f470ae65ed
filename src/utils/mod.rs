// ABOUTME: Shared utility modules
// ABOUTME: HTTP client construction with pooled connections and bounded timeouts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

/// Shared HTTP client utilities
pub mod http_client;
