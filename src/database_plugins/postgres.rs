// ABOUTME: PostgreSQL database implementation of the broker storage contract
// ABOUTME: Same contract as the SQLite backend for cloud deployments
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

//! PostgreSQL backend
//!
//! Provides PostgreSQL support for cloud deployments, implementing the same
//! interface as the SQLite version. The broker is horizontally scaled in
//! production; `DELETE ... RETURNING` gives the same linearizable
//! consumption here across many server processes sharing one database.

use super::{map_insert_error, DatabaseProvider, DbResult};
use crate::models::{AuthorizationCode, PendingAuthorization, RegisteredClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// PostgreSQL database implementation
#[derive(Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
}

fn row_to_client(row: &PgRow) -> DbResult<RegisteredClient> {
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

fn row_to_pending(row: &PgRow) -> DbResult<PendingAuthorization> {
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

fn row_to_auth_code(row: &PgRow) -> DbResult<AuthorizationCode> {
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
impl DatabaseProvider for PostgresDatabase {
    async fn new(database_url: &str) -> DbResult<Self> {
        let pool = PgPool::connect(database_url).await?;
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
                created_at TIMESTAMPTZ NOT NULL
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
                created_at TIMESTAMPTZ NOT NULL
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
                created_at TIMESTAMPTZ NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
        let row = sqlx::query("SELECT * FROM oauth_clients WHERE client_id = $1")
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
        let row = sqlx::query(
            r"
            DELETE FROM oauth_pending_auth
            WHERE pending_id = $1 AND created_at > $2
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
        let result = sqlx::query("DELETE FROM oauth_pending_auth WHERE created_at <= $1")
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
            VALUES ($1, $2, $3, $4, $5, $6, $7)
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
        let row = sqlx::query("SELECT * FROM oauth_codes WHERE code = $1 AND created_at > $2")
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
            WHERE code = $1 AND created_at > $2
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
        let result = sqlx::query("DELETE FROM oauth_codes WHERE created_at <= $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
