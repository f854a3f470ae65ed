// ABOUTME: Tests for RFC 7591 dynamic client registration and client lookup modes
// ABOUTME: Metadata round-trips, duplicate rejection, and redirect URI validation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use mcp_oauth_broker::broker::client_registration::{
    ClientLookup, ClientRegistrationManager, ClientValidationMode,
};
use mcp_oauth_broker::broker::ClientRegistrationRequest;
use mcp_oauth_broker::database_plugins::DatabaseProvider;

fn registration_request(client_id: Option<&str>) -> ClientRegistrationRequest {
    ClientRegistrationRequest {
        client_id: client_id.map(ToOwned::to_owned),
        redirect_uris: vec!["https://client.example/cb".to_owned()],
        client_name: Some("Example MCP Client".to_owned()),
        client_uri: Some("https://client.example".to_owned()),
        grant_types: None,
        response_types: None,
        scope: Some("openid profile".to_owned()),
        token_endpoint_auth_method: None,
    }
}

#[tokio::test]
async fn test_registration_round_trips_metadata_unchanged() {
    let db = common::create_test_database().await;
    let manager = ClientRegistrationManager::new(db.clone(), ClientValidationMode::Local);

    let response = manager
        .register_client(registration_request(None))
        .await
        .expect("registration succeeds");

    // The only server-side mutation is the assigned client_id
    assert!(response.client_id.starts_with("mcp_client_"));
    assert_eq!(response.redirect_uris, vec!["https://client.example/cb"]);
    assert_eq!(response.client_name.as_deref(), Some("Example MCP Client"));
    assert_eq!(response.client_uri.as_deref(), Some("https://client.example"));
    assert_eq!(response.scope.as_deref(), Some("openid profile"));
    assert_eq!(response.token_endpoint_auth_method, "none");
    assert_eq!(
        response.grant_types,
        vec!["authorization_code", "refresh_token"]
    );
    assert_eq!(response.response_types, vec!["code"]);

    // And the stored record matches what was returned
    let stored = db
        .get_client(&response.client_id)
        .await
        .unwrap()
        .expect("client persisted");
    assert_eq!(stored.redirect_uris, response.redirect_uris);
    assert_eq!(stored.client_name, response.client_name);
}

#[tokio::test]
async fn test_duplicate_client_id_is_rejected_not_overwritten() {
    let db = common::create_test_database().await;
    let manager = ClientRegistrationManager::new(db.clone(), ClientValidationMode::Local);

    manager
        .register_client(registration_request(Some("mcp_client_fixed")))
        .await
        .expect("first registration succeeds");

    let mut second = registration_request(Some("mcp_client_fixed"));
    second.client_name = Some("Impostor".to_owned());
    let err = manager
        .register_client(second)
        .await
        .expect_err("duplicate client_id must fail");
    assert_eq!(err.error, "invalid_request");

    // First registration untouched
    let stored = db.get_client("mcp_client_fixed").await.unwrap().unwrap();
    assert_eq!(stored.client_name.as_deref(), Some("Example MCP Client"));
}

#[tokio::test]
async fn test_registration_rejects_bad_redirect_uris() {
    let db = common::create_test_database().await;
    let manager = ClientRegistrationManager::new(db, ClientValidationMode::Local);

    for bad_uri in [
        "http://not-localhost.example/cb",
        "https://client.example/cb#fragment",
        "https://*.example.com/cb",
        "",
    ] {
        let mut request = registration_request(None);
        request.redirect_uris = vec![bad_uri.to_owned()];
        let err = manager
            .register_client(request)
            .await
            .expect_err("invalid redirect_uri must fail");
        assert_eq!(err.error, "invalid_request", "uri: {bad_uri}");
    }

    let mut request = registration_request(None);
    request.redirect_uris = vec![];
    let err = manager
        .register_client(request)
        .await
        .expect_err("empty redirect_uris must fail");
    assert_eq!(err.error, "invalid_request");
}

#[tokio::test]
async fn test_local_mode_rejects_unknown_clients() {
    let db = common::create_test_database().await;
    let manager = ClientRegistrationManager::new(db, ClientValidationMode::Local);

    let err = manager
        .lookup("never-registered")
        .await
        .expect_err("unknown client must fail in local mode");
    assert_eq!(err.error, "invalid_client");
}

#[tokio::test]
async fn test_delegated_mode_is_visible_in_the_lookup_type() {
    let db = common::create_test_database().await;
    let manager =
        ClientRegistrationManager::new(db, ClientValidationMode::DelegatedToUpstream);

    match manager.lookup("opaque-upstream-client").await.unwrap() {
        ClientLookup::Delegated { client_id } => {
            assert_eq!(client_id, "opaque-upstream-client");
        }
        ClientLookup::Registered(_) => panic!("unregistered client must surface as Delegated"),
    }

    // Delegated clients still get structural redirect URI checks
    let lookup = manager.lookup("opaque-upstream-client").await.unwrap();
    assert!(lookup.allows_redirect_uri("https://anything.example/cb"));
    assert!(!lookup.allows_redirect_uri("http://anything.example/cb"));
}

#[tokio::test]
async fn test_registered_clients_win_over_delegation() {
    let db = common::create_test_database().await;
    let manager =
        ClientRegistrationManager::new(db, ClientValidationMode::DelegatedToUpstream);

    let response = manager
        .register_client(registration_request(None))
        .await
        .unwrap();

    match manager.lookup(&response.client_id).await.unwrap() {
        ClientLookup::Registered(client) => {
            // Registered clients are held to their registered URI set even
            // in delegated mode
            assert!(client.redirect_uris.contains(&"https://client.example/cb".to_owned()));
        }
        ClientLookup::Delegated { .. } => panic!("registered client must surface its record"),
    }
}
