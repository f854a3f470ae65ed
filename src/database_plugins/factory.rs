// ABOUTME: Database factory and enum dispatch for multi-database support
// ABOUTME: Unified interface for SQLite and PostgreSQL with runtime selection
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

//! Database factory for creating database providers
//!
//! Automatic database type detection and creation based on connection
//! strings.

use super::sqlite::SqliteDatabase;
use super::{DatabaseError, DatabaseProvider, DbResult};
use crate::models::{AuthorizationCode, PendingAuthorization, RegisteredClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

#[cfg(feature = "postgresql")]
use super::postgres::PostgresDatabase;

/// Supported database types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    /// Embedded file-based database (local development)
    SQLite,
    /// Client-server relational database (production)
    PostgreSQL,
}

/// Database instance wrapper that delegates to the appropriate implementation
#[derive(Clone)]
pub enum Database {
    /// SQLite backend
    SQLite(SqliteDatabase),
    /// PostgreSQL backend
    #[cfg(feature = "postgresql")]
    PostgreSQL(PostgresDatabase),
}

impl Database {
    /// Get a descriptive string for the current database backend
    #[must_use]
    pub const fn backend_info(&self) -> &'static str {
        match self {
            Self::SQLite(_) => "SQLite",
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(_) => "PostgreSQL",
        }
    }
}

/// Automatically detect database type from connection string
fn detect_database_type(database_url: &str) -> DbResult<DatabaseType> {
    if database_url.starts_with("sqlite:") {
        Ok(DatabaseType::SQLite)
    } else if database_url.starts_with("postgresql://") || database_url.starts_with("postgres://") {
        Ok(DatabaseType::PostgreSQL)
    } else {
        Err(DatabaseError::Configuration(format!(
            "Unsupported database URL '{database_url}' (expected sqlite: or postgresql://)"
        )))
    }
}

#[async_trait]
impl DatabaseProvider for Database {
    async fn new(database_url: &str) -> DbResult<Self> {
        debug!("Detecting database type from URL");
        let db_type = detect_database_type(database_url)?;

        match db_type {
            DatabaseType::SQLite => {
                let db = SqliteDatabase::new(database_url).await?;
                info!("SQLite database initialized");
                Ok(Self::SQLite(db))
            }
            #[cfg(feature = "postgresql")]
            DatabaseType::PostgreSQL => {
                let db = PostgresDatabase::new(database_url).await?;
                info!("PostgreSQL database initialized");
                Ok(Self::PostgreSQL(db))
            }
            #[cfg(not(feature = "postgresql"))]
            DatabaseType::PostgreSQL => Err(DatabaseError::Configuration(
                "PostgreSQL support not enabled. Enable the 'postgresql' feature flag.".to_owned(),
            )),
        }
    }

    async fn migrate(&self) -> DbResult<()> {
        match self {
            Self::SQLite(db) => db.migrate().await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.migrate().await,
        }
    }

    async fn store_client(&self, client: &RegisteredClient) -> DbResult<()> {
        match self {
            Self::SQLite(db) => db.store_client(client).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.store_client(client).await,
        }
    }

    async fn get_client(&self, client_id: &str) -> DbResult<Option<RegisteredClient>> {
        match self {
            Self::SQLite(db) => db.get_client(client_id).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.get_client(client_id).await,
        }
    }

    async fn create_pending_auth(&self, pending: &PendingAuthorization) -> DbResult<()> {
        match self {
            Self::SQLite(db) => db.create_pending_auth(pending).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.create_pending_auth(pending).await,
        }
    }

    async fn consume_pending_auth(
        &self,
        pending_id: &str,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Option<PendingAuthorization>> {
        match self {
            Self::SQLite(db) => db.consume_pending_auth(pending_id, cutoff).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.consume_pending_auth(pending_id, cutoff).await,
        }
    }

    async fn cleanup_expired_pending(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        match self {
            Self::SQLite(db) => db.cleanup_expired_pending(cutoff).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.cleanup_expired_pending(cutoff).await,
        }
    }

    async fn store_auth_code(&self, code: &AuthorizationCode) -> DbResult<()> {
        match self {
            Self::SQLite(db) => db.store_auth_code(code).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.store_auth_code(code).await,
        }
    }

    async fn get_auth_code(
        &self,
        code: &str,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Option<AuthorizationCode>> {
        match self {
            Self::SQLite(db) => db.get_auth_code(code, cutoff).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.get_auth_code(code, cutoff).await,
        }
    }

    async fn consume_auth_code(
        &self,
        code: &str,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Option<AuthorizationCode>> {
        match self {
            Self::SQLite(db) => db.consume_auth_code(code, cutoff).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.consume_auth_code(code, cutoff).await,
        }
    }

    async fn cleanup_expired_codes(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        match self {
            Self::SQLite(db) => db.cleanup_expired_codes(cutoff).await,
            #[cfg(feature = "postgresql")]
            Self::PostgreSQL(db) => db.cleanup_expired_codes(cutoff).await,
        }
    }
}
