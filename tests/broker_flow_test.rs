// ABOUTME: End-to-end broker flow tests over the HTTP surface
// ABOUTME: Register, authorize, upstream callback, token exchange, protected MCP call
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use common::MockIdpState;
use mcp_oauth_broker::routes;
use serde_json::{json, Value};
use std::collections::HashMap;
use tower::ServiceExt;

const CLIENT_REDIRECT: &str = "https://client.example/cb";

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.expect("request handled");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body read");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}

fn location_params(headers: &axum::http::HeaderMap) -> (String, HashMap<String, String>) {
    let location = headers
        .get(header::LOCATION)
        .expect("Location header")
        .to_str()
        .unwrap()
        .to_owned();
    let parsed = url::Url::parse(&location).expect("parsable Location");
    let params = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let base = location.split('?').next().unwrap_or_default().to_owned();
    (base, params)
}

async fn register_client(app: &Router) -> String {
    let request = Request::builder()
        .method("POST")
        .uri("/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({
                "redirect_uris": [CLIENT_REDIRECT],
                "client_name": "Flow Test Client"
            })
            .to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    body["client_id"].as_str().expect("client_id issued").to_owned()
}

async fn start_authorization(
    app: &Router,
    client_id: &str,
    challenge: &str,
    state: &str,
) -> String {
    let uri = format!(
        "/authorize?response_type=code&client_id={client_id}&redirect_uri={}&state={state}&code_challenge={challenge}&code_challenge_method=S256&scope=openid",
        urlencoding::encode(CLIENT_REDIRECT)
    );
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, headers, _) = send(app, request).await;
    assert_eq!(status, StatusCode::FOUND);

    let (base, params) = location_params(&headers);
    assert!(base.ends_with("/oauth2/authorize"));
    assert_eq!(params["response_type"], "code");
    // The broker's pending id rides in the upstream state parameter
    params["state"].clone()
}

async fn complete_callback(app: &Router, upstream_code: &str, pending_id: &str) -> (String, String) {
    let uri = format!(
        "/auth/callback?code={upstream_code}&state={}",
        urlencoding::encode(pending_id)
    );
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, headers, _) = send(app, request).await;
    assert_eq!(status, StatusCode::FOUND);

    let (base, params) = location_params(&headers);
    assert_eq!(base, CLIENT_REDIRECT);
    (params["code"].clone(), params["state"].clone())
}

async fn exchange_code(
    app: &Router,
    client_id: &str,
    code: &str,
    verifier: &str,
) -> (StatusCode, Value) {
    let form = serde_urlencoded::to_string([
        ("grant_type", "authorization_code"),
        ("client_id", client_id),
        ("code", code),
        ("redirect_uri", CLIENT_REDIRECT),
        ("code_verifier", verifier),
    ])
    .unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/token")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap();
    let (status, _, body) = send(app, request).await;
    (status, body)
}

#[tokio::test]
async fn test_full_authorization_flow() {
    let access_token = common::mint_user_token("user_01FLOW");
    let idp_base = common::spawn_mock_idp(MockIdpState {
        access_token: access_token.clone(),
        refresh_token: "upstream-refresh".to_owned(),
    })
    .await;
    let resources = common::build_test_resources(&idp_base).await;
    let app = routes::router(&resources);
    let pkce = common::test_pkce();

    // Register, authorize, and follow the upstream round-trip
    let client_id = register_client(&app).await;
    let pending_id = start_authorization(&app, &client_id, &pkce.challenge, "client-state-1").await;
    let (broker_code, returned_state) =
        complete_callback(&app, "upstream-code-1", &pending_id).await;

    // The client gets the broker's code (not the upstream one) and its
    // original opaque state back
    assert_eq!(returned_state, "client-state-1");
    assert_ne!(broker_code, "upstream-code-1");

    // Exchange the broker code with the PKCE verifier for upstream tokens
    let (status, body) = exchange_code(&app, &client_id, &broker_code, &pkce.verifier).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access_token"].as_str(), Some(access_token.as_str()));
    assert_eq!(body["refresh_token"].as_str(), Some("upstream-refresh"));
    assert_eq!(body["token_type"].as_str(), Some("Bearer"));

    // The upstream access token now authenticates protected MCP requests
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
        .body(Body::from(
            json!({"jsonrpc": "2.0", "method": "ping", "id": 1}).to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["error"].is_null(), "ping should succeed: {body}");
}

#[tokio::test]
async fn test_replayed_callback_fails_cleanly() {
    let idp_base = common::spawn_mock_idp(MockIdpState {
        access_token: common::mint_user_token("user_01REPLAY"),
        refresh_token: "upstream-refresh".to_owned(),
    })
    .await;
    let resources = common::build_test_resources(&idp_base).await;
    let app = routes::router(&resources);
    let pkce = common::test_pkce();

    let client_id = register_client(&app).await;
    let pending_id = start_authorization(&app, &client_id, &pkce.challenge, "state-r").await;
    let _ = complete_callback(&app, "upstream-code-1", &pending_id).await;

    // Replaying the exact same callback URL must fail with a 400 and no
    // new code minted; the pending record was consumed on first use
    let uri = format!(
        "/auth/callback?code=upstream-code-1&state={}",
        urlencoding::encode(&pending_id)
    );
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, headers, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(headers.get(header::LOCATION).is_none());
    assert_eq!(body["error"].as_str(), Some("invalid_request"));
}

#[tokio::test]
async fn test_broker_code_is_single_use_over_http() {
    let idp_base = common::spawn_mock_idp(MockIdpState {
        access_token: common::mint_user_token("user_01ONCE"),
        refresh_token: "upstream-refresh".to_owned(),
    })
    .await;
    let resources = common::build_test_resources(&idp_base).await;
    let app = routes::router(&resources);
    let pkce = common::test_pkce();

    let client_id = register_client(&app).await;
    let pending_id = start_authorization(&app, &client_id, &pkce.challenge, "state-o").await;
    let (broker_code, _) = complete_callback(&app, "upstream-code-1", &pending_id).await;

    let (status, _) = exchange_code(&app, &client_id, &broker_code, &pkce.verifier).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = exchange_code(&app, &client_id, &broker_code, &pkce.verifier).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"].as_str(), Some("invalid_grant"));
}

#[tokio::test]
async fn test_upstream_denial_redirects_with_error_and_state() {
    let idp_base = common::spawn_mock_idp(MockIdpState {
        access_token: common::mint_user_token("user_01DENY"),
        refresh_token: "upstream-refresh".to_owned(),
    })
    .await;
    let resources = common::build_test_resources(&idp_base).await;
    let app = routes::router(&resources);
    let pkce = common::test_pkce();

    let client_id = register_client(&app).await;
    let pending_id = start_authorization(&app, &client_id, &pkce.challenge, "state-d").await;

    // The mock IdP rejects this code; the failure must still land on the
    // client's redirect URI with the original state, never a bare 500
    let uri = format!(
        "/auth/callback?code=deny-code&state={}",
        urlencoding::encode(&pending_id)
    );
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, headers, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::FOUND);

    let (base, params) = location_params(&headers);
    assert_eq!(base, CLIENT_REDIRECT);
    assert_eq!(params["error"], "access_denied");
    assert_eq!(params["state"], "state-d");
    assert!(!params.contains_key("code"));
}

#[tokio::test]
async fn test_upstream_error_callback_redirects_access_denied() {
    let idp_base = common::spawn_mock_idp(MockIdpState {
        access_token: common::mint_user_token("user_01ERRCB"),
        refresh_token: "upstream-refresh".to_owned(),
    })
    .await;
    let resources = common::build_test_resources(&idp_base).await;
    let app = routes::router(&resources);
    let pkce = common::test_pkce();

    let client_id = register_client(&app).await;
    let pending_id = start_authorization(&app, &client_id, &pkce.challenge, "state-e").await;

    // The user declined at the IdP: no code, an error instead
    let uri = format!(
        "/auth/callback?error=access_denied&error_description=user%20declined&state={}",
        urlencoding::encode(&pending_id)
    );
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, headers, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::FOUND);

    let (base, params) = location_params(&headers);
    assert_eq!(base, CLIENT_REDIRECT);
    assert_eq!(params["error"], "access_denied");
    assert_eq!(params["state"], "state-e");
}

#[tokio::test]
async fn test_refresh_grant_forwards_upstream() {
    let idp_base = common::spawn_mock_idp(MockIdpState {
        access_token: common::mint_user_token("user_01REFRESH"),
        refresh_token: "upstream-refresh".to_owned(),
    })
    .await;
    let resources = common::build_test_resources(&idp_base).await;
    let app = routes::router(&resources);

    let client_id = register_client(&app).await;
    let form = serde_urlencoded::to_string([
        ("grant_type", "refresh_token"),
        ("client_id", client_id.as_str()),
        ("refresh_token", "upstream-refresh"),
    ])
    .unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/token")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"]
        .as_str()
        .unwrap()
        .starts_with("refreshed-"));
    assert_eq!(body["refresh_token"].as_str(), Some("rotated-refresh-token"));

    // An unknown refresh token is an invalid_grant, not a 5xx
    let form = serde_urlencoded::to_string([
        ("grant_type", "refresh_token"),
        ("client_id", client_id.as_str()),
        ("refresh_token", "stolen-or-revoked"),
    ])
    .unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/token")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"].as_str(), Some("invalid_grant"));
}

#[tokio::test]
async fn test_mcp_without_token_gets_www_authenticate_challenge() {
    let idp_base = common::spawn_mock_idp(MockIdpState {
        access_token: common::mint_user_token("user_01CHAL"),
        refresh_token: "upstream-refresh".to_owned(),
    })
    .await;
    let resources = common::build_test_resources(&idp_base).await;
    let app = routes::router(&resources);

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"jsonrpc": "2.0", "method": "ping", "id": 1}).to_string(),
        ))
        .unwrap();
    let (status, headers, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let challenge = headers
        .get(header::WWW_AUTHENTICATE)
        .expect("challenge header present")
        .to_str()
        .unwrap();
    assert!(challenge.starts_with("Bearer "));
    assert!(challenge.contains("resource_metadata="));
    assert!(challenge.contains("/.well-known/oauth-protected-resource/mcp"));
}

#[tokio::test]
async fn test_discovery_metadata_matches_configuration() {
    let idp_base = common::spawn_mock_idp(MockIdpState {
        access_token: common::mint_user_token("user_01DISC"),
        refresh_token: "upstream-refresh".to_owned(),
    })
    .await;
    let resources = common::build_test_resources(&idp_base).await;
    let app = routes::router(&resources);

    let request = Request::builder()
        .uri("/.well-known/oauth-authorization-server")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["issuer"].as_str(), Some("http://localhost:8080"));
    assert_eq!(
        body["code_challenge_methods_supported"],
        json!(["S256"])
    );
    assert_eq!(
        body["token_endpoint"].as_str(),
        Some("http://localhost:8080/token")
    );

    let request = Request::builder()
        .uri("/.well-known/oauth-protected-resource/mcp")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["resource"].as_str(),
        Some("http://localhost:8080/mcp")
    );
    assert_eq!(
        body["authorization_servers"],
        json!(["http://localhost:8080"])
    );
}
