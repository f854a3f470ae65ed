// ABOUTME: Database provider abstraction for multi-database support
// ABOUTME: Defines the storage contract for clients, pending authorizations, and codes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

//! Database provider trait and error types
//!
//! The three tables behind this trait (`oauth_clients`, `oauth_pending_auth`,
//! `oauth_codes`) are the only place OAuth protocol state lives. Every
//! consume operation is a single atomic `DELETE ... RETURNING` statement:
//! under concurrent double-submission exactly one caller observes the row
//! and all others observe `None`. This is the central correctness property
//! that prevents authorization-code replay.

use crate::models::{AuthorizationCode, PendingAuthorization, RegisteredClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Database factory and enum dispatch
pub mod factory;

#[cfg(feature = "postgresql")]
/// PostgreSQL backend
pub mod postgres;

/// SQLite backend
pub mod sqlite;

pub use factory::Database;

/// Typed database errors
///
/// `Duplicate` is surfaced separately from generic query failures because
/// callers treat it differently: a duplicate client registration is a 4xx
/// client error, while a duplicate pending id or code is an invariant
/// violation (the ids are 256-bit random values; a collision points at an
/// entropy bug and must alert operators instead of being retried).
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A unique constraint was violated on insert
    #[error("{entity} already exists: {id}")]
    Duplicate {
        /// Which table/entity collided
        entity: &'static str,
        /// The colliding identifier
        id: String,
    },
    /// The database URL or backend selection is invalid
    #[error("unsupported database configuration: {0}")]
    Configuration(String),
    /// Any other database failure
    #[error("database query failed: {0}")]
    Query(#[from] sqlx::Error),
}

impl DatabaseError {
    /// True when the error is a unique-constraint collision
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

/// Result type for storage operations
pub type DbResult<T> = Result<T, DatabaseError>;

/// Storage contract implemented by every backend
///
/// `consume_*` returning `None` is deliberately indistinguishable between
/// "never existed", "already consumed", and "swept after expiry" - callers
/// map all three to the same OAuth `invalid_grant` so the response does not
/// leak whether an identifier was ever valid.
#[async_trait]
pub trait DatabaseProvider: Sized + Send + Sync {
    /// Connect and run migrations
    async fn new(database_url: &str) -> DbResult<Self>;

    /// Create tables if they do not exist
    async fn migrate(&self) -> DbResult<()>;

    // === Client registry ===

    /// Persist a registered client; fails with [`DatabaseError::Duplicate`]
    /// when the `client_id` is already taken (never silently overwrites)
    async fn store_client(&self, client: &RegisteredClient) -> DbResult<()>;

    /// Look up a registered client by id
    async fn get_client(&self, client_id: &str) -> DbResult<Option<RegisteredClient>>;

    // === Pending authorizations ===

    /// Persist a pending authorization; a `pending_id` collision is
    /// [`DatabaseError::Duplicate`] (invariant violation, not a retry)
    async fn create_pending_auth(&self, pending: &PendingAuthorization) -> DbResult<()>;

    /// Atomically delete-and-return the pending authorization, provided it
    /// was created after `cutoff`. Exactly one of N concurrent callers wins.
    async fn consume_pending_auth(
        &self,
        pending_id: &str,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Option<PendingAuthorization>>;

    /// Delete pending authorizations created before `cutoff`; returns the
    /// number of rows removed. Advisory hygiene only.
    async fn cleanup_expired_pending(&self, cutoff: DateTime<Utc>) -> DbResult<u64>;

    // === Authorization codes ===

    /// Persist an authorization code; a collision is
    /// [`DatabaseError::Duplicate`] (invariant violation)
    async fn store_auth_code(&self, code: &AuthorizationCode) -> DbResult<()>;

    /// Non-destructive peek, used to recover the PKCE challenge before the
    /// code is consumed. Honors the same `cutoff` as consumption so a peek
    /// never revives an expired code.
    async fn get_auth_code(
        &self,
        code: &str,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Option<AuthorizationCode>>;

    /// Atomically delete-and-return the authorization code, provided it was
    /// created after `cutoff`
    async fn consume_auth_code(
        &self,
        code: &str,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Option<AuthorizationCode>>;

    /// Delete authorization codes created before `cutoff`; returns the
    /// number of rows removed
    async fn cleanup_expired_codes(&self, cutoff: DateTime<Utc>) -> DbResult<u64>;
}

/// Map a sqlx error to [`DatabaseError::Duplicate`] when it is a
/// unique-constraint violation, preserving the entity/id context
pub(crate) fn map_insert_error(
    err: sqlx::Error,
    entity: &'static str,
    id: &str,
) -> DatabaseError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => DatabaseError::Duplicate {
            entity,
            id: id.to_owned(),
        },
        _ => DatabaseError::Query(err),
    }
}
