// ABOUTME: SQLite database implementation of the broker storage contract
// ABOUTME: Migrations, client CRUD, and atomic DELETE..RETURNING consumption
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

//! SQLite backend
//!
//! Used for local development and tests. Consumption relies on SQLite's
//! `DELETE ... RETURNING` (3.35+), which sqlx's bundled SQLite provides.

use super::{map_insert_error, DatabaseProvider, DbResult};
use crate::models::{AuthorizationCode, PendingAuthorization, RegisteredClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

/// SQLite database implementation
#[derive(Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    /// Access the underlying pool (test support)
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_client(row: &SqliteRow) -> DbResult<RegisteredClient> {
    let redirect_uris: String = row.try_get("redirect_uris")?;
    let grant_types: String = row.try_get("grant_types")?;
    let response_types: String = row.try_get("response_types")?;
    Ok(RegisteredClient {
        client_id: row.try_get("client_id")?,
        redirect_uris: serde_json::from_str(&redirect_uris).unwrap_or_default(),
        client_name: row.try_get("client_name")?,
        grant_types: serde_json::from_str(&grant_types).unwrap_or_default(),
        response_types: serde_json::from_str(&response_types).unwrap_or_default(),
        scope: row.try_get("scope")?,
        token_endpoint_auth_method: row.try_get("token_endpoint_auth_method")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_pending(row: &SqliteRow) -> DbResult<PendingAuthorization> {
    Ok(PendingAuthorization {
        pending_id: row.try_get("pending_id")?,
        client_id: row.try_get("client_id")?,
        redirect_uri: row.try_get("redirect_uri")?,
        code_challenge: row.try_get("code_challenge")?,
        state: row.try_get("state")?,
        scopes: row.try_get("scopes")?,
        resource: row.try_get("resource")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_auth_code(row: &SqliteRow) -> DbResult<AuthorizationCode> {
    Ok(AuthorizationCode {
        code: row.try_get("code")?,
        client_id: row.try_get("client_id")?,
        code_challenge: row.try_get("code_challenge")?,
        redirect_uri: row.try_get("redirect_uri")?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl DatabaseProvider for SqliteDatabase {
    async fn new(database_url: &str) -> DbResult<Self> {
        // `sqlite::memory:` gives each pooled connection its own private
        // database; a single connection keeps state shared across callers.
        let is_memory = database_url.contains(":memory:");

        let connection_options = if database_url.starts_with("sqlite:") && !is_memory {
            // Ensure SQLite creates the database file if it doesn't exist
            format!("{database_url}?mode=rwc")
        } else {
            database_url.to_owned()
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(if is_memory { 1 } else { 5 })
            .connect(&connection_options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> DbResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS oauth_clients (
                client_id TEXT PRIMARY KEY,
                client_name TEXT,
                redirect_uris TEXT NOT NULL,
                grant_types TEXT NOT NULL,
                response_types TEXT NOT NULL,
                scope TEXT,
                token_endpoint_auth_method TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS oauth_pending_auth (
                pending_id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                redirect_uri TEXT NOT NULL,
                code_challenge TEXT NOT NULL,
                state TEXT,
                scopes TEXT,
                resource TEXT,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS oauth_codes (
                code TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                code_challenge TEXT NOT NULL,
                redirect_uri TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Sweep queries scan by age
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_pending_auth_created_at ON oauth_pending_auth(created_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_codes_created_at ON oauth_codes(created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn store_client(&self, client: &RegisteredClient) -> DbResult<()> {
        sqlx::query(
            r"
            INSERT INTO oauth_clients
                (client_id, client_name, redirect_uris, grant_types, response_types,
                 scope, token_endpoint_auth_method, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&client.client_id)
        .bind(&client.client_name)
        .bind(serde_json::to_string(&client.redirect_uris).unwrap_or_default())
        .bind(serde_json::to_string(&client.grant_types).unwrap_or_default())
        .bind(serde_json::to_string(&client.response_types).unwrap_or_default())
        .bind(&client.scope)
        .bind(&client.token_endpoint_auth_method)
        .bind(client.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "OAuth client", &client.client_id))?;
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> DbResult<Option<RegisteredClient>> {
        let row = sqlx::query("SELECT * FROM oauth_clients WHERE client_id = ?")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_client).transpose()
    }

    async fn create_pending_auth(&self, pending: &PendingAuthorization) -> DbResult<()> {
        sqlx::query(
            r"
            INSERT INTO oauth_pending_auth
                (pending_id, client_id, redirect_uri, code_challenge, state,
                 scopes, resource, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&pending.pending_id)
        .bind(&pending.client_id)
        .bind(&pending.redirect_uri)
        .bind(&pending.code_challenge)
        .bind(&pending.state)
        .bind(&pending.scopes)
        .bind(&pending.resource)
        .bind(pending.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "pending authorization", &pending.pending_id))?;
        Ok(())
    }

    async fn consume_pending_auth(
        &self,
        pending_id: &str,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Option<PendingAuthorization>> {
        // Single-statement delete-and-return: concurrent callers cannot both
        // observe the row.
        let row = sqlx::query(
            r"
            DELETE FROM oauth_pending_auth
            WHERE pending_id = ? AND created_at > ?
            RETURNING *
            ",
        )
        .bind(pending_id)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_pending).transpose()
    }

    async fn cleanup_expired_pending(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM oauth_pending_auth WHERE created_at <= ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn store_auth_code(&self, code: &AuthorizationCode) -> DbResult<()> {
        sqlx::query(
            r"
            INSERT INTO oauth_codes
                (code, client_id, code_challenge, redirect_uri, access_token,
                 refresh_token, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&code.code)
        .bind(&code.client_id)
        .bind(&code.code_challenge)
        .bind(&code.redirect_uri)
        .bind(&code.access_token)
        .bind(&code.refresh_token)
        .bind(code.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, "authorization code", &code.code))?;
        Ok(())
    }

    async fn get_auth_code(
        &self,
        code: &str,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Option<AuthorizationCode>> {
        let row = sqlx::query("SELECT * FROM oauth_codes WHERE code = ? AND created_at > ?")
            .bind(code)
            .bind(cutoff)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_auth_code).transpose()
    }

    async fn consume_auth_code(
        &self,
        code: &str,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Option<AuthorizationCode>> {
        let row = sqlx::query(
            r"
            DELETE FROM oauth_codes
            WHERE code = ? AND created_at > ?
            RETURNING *
            ",
        )
        .bind(code)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_auth_code).transpose()
    }

    async fn cleanup_expired_codes(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM oauth_codes WHERE created_at <= ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
