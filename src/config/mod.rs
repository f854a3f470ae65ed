// ABOUTME: Configuration management modules
// ABOUTME: Environment-driven server configuration with typed sub-configs
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

/// Environment-based configuration management
pub mod environment;

pub use environment::{
    BrokerConfig, DatabaseConfig, DatabaseUrl, LogLevel, ServerConfig, UpstreamConfig,
};
