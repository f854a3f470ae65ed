// ABOUTME: OAuth 2.0 dynamic client registration implementation (RFC 7591)
// ABOUTME: Handles client registration and mode-aware client lookup for MCP clients
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

use super::models::{ClientRegistrationRequest, ClientRegistrationResponse, OAuthError};
use crate::database_plugins::{Database, DatabaseProvider};
use crate::models::RegisteredClient;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// How client ids presented at authorization time are validated
///
/// `Local` requires a prior RFC 7591 registration in the broker's own
/// store. `DelegatedToUpstream` accepts any well-formed client id and
/// defers real validation to the upstream IdP; the lookup then returns a
/// [`ClientLookup::Delegated`] value rather than fabricating a synthetic
/// registration record, so the weaker trust boundary stays visible to
/// callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientValidationMode {
    /// Clients must be registered with this broker
    #[default]
    Local,
    /// Any client id is accepted; the upstream IdP is the authority
    DelegatedToUpstream,
}

/// Result of a client lookup
#[derive(Debug, Clone)]
pub enum ClientLookup {
    /// A locally registered client with its full record
    Registered(RegisteredClient),
    /// An unregistered client accepted under delegated validation
    Delegated {
        /// The client id as presented
        client_id: String,
    },
}

impl ClientLookup {
    /// The client id behind this lookup
    #[must_use]
    pub fn client_id(&self) -> &str {
        match self {
            Self::Registered(client) => &client.client_id,
            Self::Delegated { client_id } => client_id,
        }
    }

    /// Whether the given redirect URI is acceptable for this client
    ///
    /// Registered clients are held to their registered URI set; delegated
    /// clients only get the structural https/loopback check, since there is
    /// no registration to compare against.
    #[must_use]
    pub fn allows_redirect_uri(&self, uri: &str) -> bool {
        match self {
            Self::Registered(client) => client.redirect_uris.iter().any(|u| u == uri),
            Self::Delegated { .. } => is_valid_redirect_uri(uri),
        }
    }
}

/// OAuth 2.0 Client Registration Manager
pub struct ClientRegistrationManager {
    database: Arc<Database>,
    mode: ClientValidationMode,
}

impl ClientRegistrationManager {
    /// Creates a new client registration manager
    #[must_use]
    pub const fn new(database: Arc<Database>, mode: ClientValidationMode) -> Self {
        Self { database, mode }
    }

    /// Register a new OAuth 2.0 client (RFC 7591)
    ///
    /// The submitted metadata is persisted unchanged; the only server-side
    /// mutation is assigning a `client_id` when the request carries none.
    ///
    /// # Errors
    /// Returns an error if validation fails, the `client_id` is already
    /// taken, or storage fails
    pub async fn register_client(
        &self,
        request: ClientRegistrationRequest,
    ) -> Result<ClientRegistrationResponse, OAuthError> {
        Self::validate_registration_request(&request)?;

        let client_id = request.client_id.unwrap_or_else(generate_client_id);

        // MCP clients are public clients authenticating with PKCE only
        let grant_types = request
            .grant_types
            .unwrap_or_else(|| vec!["authorization_code".to_owned(), "refresh_token".to_owned()]);
        let response_types = request
            .response_types
            .unwrap_or_else(|| vec!["code".to_owned()]);
        let token_endpoint_auth_method = request
            .token_endpoint_auth_method
            .unwrap_or_else(|| "none".to_owned());

        let created_at = Utc::now();

        let client = RegisteredClient {
            client_id: client_id.clone(),
            redirect_uris: request.redirect_uris.clone(),
            client_name: request.client_name.clone(),
            grant_types: grant_types.clone(),
            response_types: response_types.clone(),
            scope: request.scope.clone(),
            token_endpoint_auth_method: token_endpoint_auth_method.clone(),
            created_at,
        };

        self.database.store_client(&client).await.map_err(|e| {
            if e.is_duplicate() {
                tracing::warn!(client_id = %client_id, "Duplicate client registration rejected");
                OAuthError::invalid_request("client_id is already registered")
            } else {
                tracing::error!(error = %e, client_id = %client_id, "Failed to store client registration");
                OAuthError::server_error("Failed to store client registration")
            }
        })?;

        Ok(ClientRegistrationResponse {
            client_id,
            client_id_issued_at: created_at.timestamp(),
            redirect_uris: request.redirect_uris,
            grant_types,
            response_types,
            client_name: request.client_name,
            client_uri: request.client_uri,
            scope: request.scope,
            token_endpoint_auth_method,
        })
    }

    /// Look up a client by id under the configured validation mode
    ///
    /// # Errors
    /// Returns `invalid_client` when the client is unknown in `Local` mode
    /// or the database fails
    pub async fn lookup(&self, client_id: &str) -> Result<ClientLookup, OAuthError> {
        let stored = self.database.get_client(client_id).await.map_err(|e| {
            tracing::error!(error = %e, client_id = %client_id, "Client lookup failed");
            OAuthError::server_error("Client lookup failed")
        })?;

        match (stored, self.mode) {
            (Some(client), _) => Ok(ClientLookup::Registered(client)),
            (None, ClientValidationMode::DelegatedToUpstream) => {
                tracing::debug!(client_id = %client_id, "Accepting unregistered client (delegated validation)");
                Ok(ClientLookup::Delegated {
                    client_id: client_id.to_owned(),
                })
            }
            (None, ClientValidationMode::Local) => {
                tracing::warn!(client_id = %client_id, "Unknown client");
                Err(OAuthError::invalid_client())
            }
        }
    }

    /// Validate registration request
    fn validate_registration_request(
        request: &ClientRegistrationRequest,
    ) -> Result<(), OAuthError> {
        if request.redirect_uris.is_empty() {
            return Err(OAuthError::invalid_request(
                "At least one redirect_uri is required",
            ));
        }

        for uri in &request.redirect_uris {
            if !is_valid_redirect_uri(uri) {
                return Err(OAuthError::invalid_request(&format!(
                    "Invalid redirect_uri: {uri}"
                )));
            }
        }

        if let Some(ref grant_types) = request.grant_types {
            for grant_type in grant_types {
                if !is_supported_grant_type(grant_type) {
                    return Err(OAuthError::invalid_request(&format!(
                        "Unsupported grant_type: {grant_type}"
                    )));
                }
            }
        }

        if let Some(ref response_types) = request.response_types {
            for response_type in response_types {
                if response_type != "code" {
                    return Err(OAuthError::invalid_request(&format!(
                        "Unsupported response_type: {response_type}"
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Check if a redirect URI is acceptable
///
/// OAuth 2.0 Security Best Practices (RFC 6749 §3.1.2.2):
/// - MUST be an absolute URI without a fragment
/// - SHOULD use https:// except for localhost/loopback
fn is_valid_redirect_uri(uri: &str) -> bool {
    if uri.trim().is_empty() {
        return false;
    }

    // Fragments are a token-leak risk (RFC 6749 §3.1.2)
    if uri.contains('#') {
        tracing::warn!("Rejected redirect_uri with fragment: {}", uri);
        return false;
    }

    // Wildcards enable subdomain-bypass attacks
    if uri.contains('*') {
        tracing::warn!("Rejected redirect_uri with wildcard: {}", uri);
        return false;
    }

    // Out-of-band URN for native apps (RFC 8252)
    if uri == "urn:ietf:wg:oauth:2.0:oob" {
        return true;
    }

    validate_http_uri(uri)
}

/// Validate HTTP(S) URI scheme and host
fn validate_http_uri(uri: &str) -> bool {
    let Ok(parsed_uri) = url::Url::parse(uri) else {
        tracing::warn!("Rejected malformed redirect_uri: {}", uri);
        return false;
    };

    let scheme = parsed_uri.scheme();
    let is_loopback = matches!(parsed_uri.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));

    if scheme == "https" || (scheme == "http" && is_loopback) {
        return true;
    }

    tracing::warn!(
        "Rejected redirect_uri with non-HTTPS scheme for non-localhost: {}",
        uri
    );
    false
}

/// Check if a grant type is supported
fn is_supported_grant_type(grant_type: &str) -> bool {
    matches!(grant_type, "authorization_code" | "refresh_token")
}

/// Generate a client id for registrations that did not propose one
fn generate_client_id() -> String {
    format!(
        "{}{}",
        crate::constants::oauth::CLIENT_ID_PREFIX,
        Uuid::new_v4().simple()
    )
}
