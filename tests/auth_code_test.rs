// ABOUTME: Tests for the authorization code store and broker exchange operations
// ABOUTME: Single-use exchange, PKCE binding, redirect URI binding, and client ownership
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use chrono::{Duration, Utc};
use mcp_oauth_broker::broker::TokenRequest;
use mcp_oauth_broker::database_plugins::DatabaseProvider;
use mcp_oauth_broker::models::AuthorizationCode;

fn sample_code(code: &str, challenge: &str) -> AuthorizationCode {
    AuthorizationCode {
        code: code.to_owned(),
        client_id: "mcp_client_a".to_owned(),
        code_challenge: challenge.to_owned(),
        redirect_uri: "https://client.example/cb".to_owned(),
        access_token: "A".to_owned(),
        refresh_token: Some("R".to_owned()),
        created_at: Utc::now(),
    }
}

fn fresh_cutoff() -> chrono::DateTime<Utc> {
    Utc::now() - Duration::seconds(60)
}

#[tokio::test]
async fn test_peek_is_non_destructive() {
    let db = common::create_test_database().await;
    db.store_auth_code(&sample_code("c1", "challenge")).await.unwrap();

    // Two peeks and a consume all see the same underlying row
    assert!(db.get_auth_code("c1", fresh_cutoff()).await.unwrap().is_some());
    assert!(db.get_auth_code("c1", fresh_cutoff()).await.unwrap().is_some());
    assert!(db.consume_auth_code("c1", fresh_cutoff()).await.unwrap().is_some());
    assert!(db.get_auth_code("c1", fresh_cutoff()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_code_consume_has_exactly_one_winner() {
    let db = common::create_test_database().await;
    db.store_auth_code(&sample_code("c1", "challenge")).await.unwrap();

    let (a, b) = tokio::join!(
        db.consume_auth_code("c1", fresh_cutoff()),
        db.consume_auth_code("c1", fresh_cutoff()),
    );

    let winners = [a.unwrap(), b.unwrap()].into_iter().flatten().count();
    assert_eq!(winners, 1);
}

async fn resources_with_code(
    code: AuthorizationCode,
) -> std::sync::Arc<mcp_oauth_broker::context::ServerResources> {
    let resources = common::build_test_resources("http://127.0.0.1:9").await;
    resources.database.store_auth_code(&code).await.unwrap();
    resources
}

#[tokio::test]
async fn test_exchange_returns_upstream_token_pair_once() {
    let resources = resources_with_code(sample_code("c1", "challenge")).await;

    let first = resources
        .broker
        .exchange_authorization_code("mcp_client_a", "c1", Some("https://client.example/cb"))
        .await
        .expect("first exchange succeeds");
    assert_eq!(first.access_token, "A");
    assert_eq!(first.refresh_token.as_deref(), Some("R"));
    assert_eq!(first.token_type, "Bearer");

    let second = resources
        .broker
        .exchange_authorization_code("mcp_client_a", "c1", Some("https://client.example/cb"))
        .await
        .expect_err("second exchange must fail");
    assert_eq!(second.error, "invalid_grant");
}

#[tokio::test]
async fn test_exchange_rejects_redirect_uri_mismatch() {
    let resources = resources_with_code(sample_code("c1", "challenge")).await;

    let err = resources
        .broker
        .exchange_authorization_code("mcp_client_a", "c1", Some("https://attacker.example/cb"))
        .await
        .expect_err("mismatched redirect_uri must fail");
    assert_eq!(err.error, "invalid_grant");

    // Consume-before-validate: the mismatch burned the code
    let err = resources
        .broker
        .exchange_authorization_code("mcp_client_a", "c1", Some("https://client.example/cb"))
        .await
        .expect_err("code is burned after a mismatched attempt");
    assert_eq!(err.error, "invalid_grant");
}

#[tokio::test]
async fn test_exchange_rejects_missing_redirect_uri_when_bound() {
    let resources = resources_with_code(sample_code("c1", "challenge")).await;

    let err = resources
        .broker
        .exchange_authorization_code("mcp_client_a", "c1", None)
        .await
        .expect_err("absent redirect_uri must fail when the stored one is non-empty");
    assert_eq!(err.error, "invalid_grant");
}

#[tokio::test]
async fn test_exchange_rejects_foreign_client() {
    let resources = resources_with_code(sample_code("c1", "challenge")).await;

    let err = resources
        .broker
        .exchange_authorization_code("mcp_client_b", "c1", Some("https://client.example/cb"))
        .await
        .expect_err("code issued to client A must not exchange as client B");
    assert_eq!(err.error, "invalid_grant");
}

#[tokio::test]
async fn test_challenge_lookup_rejects_foreign_client() {
    let resources = resources_with_code(sample_code("c1", "challenge")).await;

    let err = resources
        .broker
        .challenge_for_authorization_code("mcp_client_b", "c1")
        .await
        .expect_err("challenge lookup must enforce ownership");
    assert_eq!(err.error, "invalid_grant");

    let challenge = resources
        .broker
        .challenge_for_authorization_code("mcp_client_a", "c1")
        .await
        .expect("owner recovers the challenge");
    assert_eq!(challenge, "challenge");
}

#[tokio::test]
async fn test_token_endpoint_pkce_failure_leaves_code_redeemable() {
    let pkce = common::test_pkce();
    let resources = resources_with_code(sample_code("c1", &pkce.challenge)).await;

    let bad_request = TokenRequest {
        grant_type: "authorization_code".to_owned(),
        code: Some("c1".to_owned()),
        redirect_uri: Some("https://client.example/cb".to_owned()),
        client_id: "mcp_client_a".to_owned(),
        code_verifier: Some("x".repeat(43)),
        refresh_token: None,
        scope: None,
        resource: None,
    };
    let err = resources.broker.token(bad_request).await.expect_err("wrong verifier fails");
    assert_eq!(err.error, "invalid_grant");

    // The failed verifier only peeked; the real client can still exchange
    let good_request = TokenRequest {
        grant_type: "authorization_code".to_owned(),
        code: Some("c1".to_owned()),
        redirect_uri: Some("https://client.example/cb".to_owned()),
        client_id: "mcp_client_a".to_owned(),
        code_verifier: Some(pkce.verifier.clone()),
        refresh_token: None,
        scope: None,
        resource: None,
    };
    let response = resources.broker.token(good_request).await.expect("correct verifier succeeds");
    assert_eq!(response.access_token, "A");
}

#[tokio::test]
async fn test_expired_code_is_not_redeemable() {
    let mut code = sample_code("c-old", "challenge");
    code.created_at = Utc::now() - Duration::seconds(120);
    let resources = resources_with_code(code).await;

    let err = resources
        .broker
        .exchange_authorization_code("mcp_client_a", "c-old", Some("https://client.example/cb"))
        .await
        .expect_err("expired code must fail like an unknown one");
    assert_eq!(err.error, "invalid_grant");
}
