// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Provides database, key material, mock IdP, and resource wiring helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors
#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]
#![allow(missing_docs)]

//! Shared test utilities for `mcp_oauth_broker`

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use mcp_oauth_broker::broker::client_registration::ClientValidationMode;
use mcp_oauth_broker::config::{
    BrokerConfig, DatabaseConfig, DatabaseUrl, LogLevel, ServerConfig, UpstreamConfig,
};
use mcp_oauth_broker::context::ServerResources;
use mcp_oauth_broker::database_plugins::{Database, DatabaseProvider};
use mcp_oauth_broker::jwks::RemoteJwks;
use mcp_oauth_broker::upstream::UpstreamClient;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Once, OnceLock};

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// The issuer every test token claims, and the verifier expects
pub const TEST_ISSUER: &str = "https://idp.test";

/// RSA key material shared across tests
pub struct TestKeys {
    pub encoding_key: EncodingKey,
    pub kid: String,
    pub jwk_set: JwkSet,
}

static TEST_KEYS: OnceLock<TestKeys> = OnceLock::new();

/// Get the shared test RSA keypair and its JWKS document
///
/// Key generation is slow, so one 2048-bit key serves the whole test
/// process - exactly how a static key set substitutes for the remote one.
pub fn get_shared_test_keys() -> &'static TestKeys {
    TEST_KEYS.get_or_init(|| {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("RSA key generation");

        let pem = private_key
            .to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
            .expect("PEM export");
        let encoding_key =
            EncodingKey::from_rsa_pem(pem.as_bytes()).expect("EncodingKey from PEM");

        let kid = "test-key-1".to_owned();
        let n = URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be());

        let jwk_set: JwkSet = serde_json::from_value(json!({
            "keys": [{
                "kty": "RSA",
                "use": "sig",
                "alg": "RS256",
                "kid": kid,
                "n": n,
                "e": e
            }]
        }))
        .expect("JWKS construction");

        TestKeys {
            encoding_key,
            kid,
            jwk_set,
        }
    })
}

/// Sign a token with the shared test key
pub fn mint_token(claims: &serde_json::Value) -> String {
    let keys = get_shared_test_keys();
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(keys.kid.clone());
    jsonwebtoken::encode(&header, claims, &keys.encoding_key).expect("token signing")
}

/// Sign a well-formed user token expiring in an hour
pub fn mint_user_token(sub: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    mint_token(&json!({
        "iss": TEST_ISSUER,
        "sub": sub,
        "exp": now + 3600,
        "email": format!("{sub}@example.com"),
        "scope": "openid profile email"
    }))
}

/// Standard test database setup (shared in-memory SQLite)
pub async fn create_test_database() -> Arc<Database> {
    init_test_logging();
    let database = Database::new("sqlite::memory:")
        .await
        .expect("in-memory database");
    Arc::new(database)
}

/// PKCE verifier/challenge pair for tests
pub struct TestPkce {
    pub verifier: String,
    pub challenge: String,
}

/// Build a valid PKCE S256 pair
pub fn test_pkce() -> TestPkce {
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk".to_owned();
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(hasher.finalize());
    TestPkce {
        verifier,
        challenge,
    }
}

/// Server configuration pointed at a (possibly mock) upstream IdP
pub fn test_server_config(upstream_base: &str) -> ServerConfig {
    ServerConfig {
        http_port: 0,
        public_url: "http://localhost:8080".to_owned(),
        log_level: LogLevel::Warn,
        database: DatabaseConfig {
            url: DatabaseUrl::Memory,
        },
        upstream: UpstreamConfig {
            issuer: TEST_ISSUER.to_owned(),
            client_id: "broker-at-idp".to_owned(),
            client_secret: None,
            authorize_url: format!("{upstream_base}/oauth2/authorize"),
            token_url: format!("{upstream_base}/oauth2/token"),
            jwks_url: format!("{upstream_base}/oauth2/jwks"),
            scopes: vec!["openid".to_owned(), "profile".to_owned(), "email".to_owned()],
            expected_audience: None,
        },
        broker: BrokerConfig {
            pending_auth_ttl_secs: 600,
            auth_code_ttl_secs: 60,
            sweep_interval_secs: 60,
            jwks_refresh_secs: 300,
            client_validation: ClientValidationMode::Local,
            scopes_supported: vec!["openid".to_owned(), "profile".to_owned(), "email".to_owned()],
        },
    }
}

/// Fixed token material the mock IdP hands out
#[derive(Clone)]
pub struct MockIdpState {
    pub access_token: String,
    pub refresh_token: String,
}

async fn mock_token_handler(
    State(state): State<MockIdpState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") => {
            if form.get("code").map(String::as_str) == Some("deny-code") {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "invalid_grant",
                        "error_description": "authorization code rejected"
                    })),
                )
                    .into_response();
            }
            Json(json!({
                "access_token": state.access_token,
                "refresh_token": state.refresh_token,
                "token_type": "Bearer",
                "expires_in": 3600
            }))
            .into_response()
        }
        Some("refresh_token") => {
            if form.get("refresh_token").map(String::as_str) != Some(state.refresh_token.as_str())
            {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "invalid_grant",
                        "error_description": "unknown refresh token"
                    })),
                )
                    .into_response();
            }
            Json(json!({
                "access_token": format!("refreshed-{}", state.access_token),
                "refresh_token": "rotated-refresh-token",
                "token_type": "Bearer",
                "expires_in": 3600
            }))
            .into_response()
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "unsupported_grant_type"})),
        )
            .into_response(),
    }
}

/// Spawn a mock upstream IdP serving the standard /oauth2/token layout;
/// returns its base URL
pub async fn spawn_mock_idp(state: MockIdpState) -> String {
    let app = Router::new()
        .route("/oauth2/token", post(mock_token_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock IdP");
    let addr = listener.local_addr().expect("mock IdP addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock IdP serve");
    });
    format!("http://{addr}")
}

/// Wire full server resources over an in-memory database, the shared static
/// JWKS, and a mock upstream IdP
pub async fn build_test_resources(upstream_base: &str) -> Arc<ServerResources> {
    let database = Database::new("sqlite::memory:")
        .await
        .expect("in-memory database");
    let config = test_server_config(upstream_base);

    let jwks = Arc::new(RemoteJwks::from_static(
        get_shared_test_keys().jwk_set.clone(),
    ));
    let callback_url = format!("{}/auth/callback", config.public_url);
    let upstream = Arc::new(UpstreamClient::new(config.upstream.clone(), callback_url));

    Arc::new(ServerResources::with_overrides(
        database, config, jwks, upstream,
    ))
}
