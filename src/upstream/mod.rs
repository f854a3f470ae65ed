// ABOUTME: OAuth/OIDC client toward the upstream identity provider
// ABOUTME: Authorization URL building, code exchange, and refresh grants
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

//! Upstream identity provider client
//!
//! The broker is itself an OAuth client in a second flow: it exchanges the
//! upstream authorization code for upstream tokens on the user's behalf,
//! and forwards refresh grants. The upstream is treated purely as an
//! OAuth/OIDC peer - any compliant IdP is substitutable.
//!
//! Every outbound call carries a bounded timeout; a timeout is a retryable
//! dependency error ([`UpstreamError::Unavailable`]), never `invalid_grant`.

use crate::config::UpstreamConfig;
use crate::utils::http_client::oauth_client;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Errors from upstream IdP interactions
///
/// `Denied` is an OAuth-level rejection (the grant is dead; the caller must
/// restart); `Unavailable` is a dependency outage (retryable by the caller,
/// never retried in-request by the broker).
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The IdP answered with an OAuth error response
    #[error("upstream IdP denied the request: {error}: {description}")]
    Denied {
        /// OAuth error code from the IdP
        error: String,
        /// Description from the IdP (logged, never echoed verbatim to clients)
        description: String,
    },
    /// The IdP is unreachable, timing out, or failing
    #[error("upstream IdP unavailable: {0}")]
    Unavailable(#[from] reqwest::Error),
    /// The IdP answered with something that is not an OAuth response
    #[error("upstream IdP returned a malformed response: {0}")]
    Malformed(String),
}

/// Token material returned by the upstream IdP
#[derive(Debug, Clone)]
pub struct UpstreamToken {
    /// The access token
    pub access_token: String,
    /// Refresh token, when issued
    pub refresh_token: Option<String>,
    /// Lifetime in seconds, when reported
    pub expires_in: Option<i64>,
    /// Granted scopes, when reported
    pub scope: Option<String>,
}

/// Wire shape of the upstream token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponseBody {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
}

/// Wire shape of an upstream OAuth error response
#[derive(Debug, Deserialize)]
struct ErrorResponseBody {
    error: String,
    error_description: Option<String>,
}

/// Client for the upstream identity provider
pub struct UpstreamClient {
    config: UpstreamConfig,
    callback_url: String,
    client: reqwest::Client,
}

impl UpstreamClient {
    /// Create a new upstream client
    ///
    /// `callback_url` is the broker's own callback endpoint, registered as
    /// the redirect URI at the upstream IdP.
    #[must_use]
    pub fn new(config: UpstreamConfig, callback_url: String) -> Self {
        Self {
            config,
            callback_url,
            client: oauth_client(),
        }
    }

    /// Create an upstream client with a caller-supplied HTTP client
    /// (test support)
    #[must_use]
    pub const fn with_http_client(
        config: UpstreamConfig,
        callback_url: String,
        client: reqwest::Client,
    ) -> Self {
        Self {
            config,
            callback_url,
            client,
        }
    }

    /// Build the upstream authorization URL for one authorization attempt
    ///
    /// The broker's `pending_id` rides in the upstream `state` parameter:
    /// the IdP knows nothing of the broker's own PKCE and client
    /// bookkeeping, so the state round-trip is what reconnects the callback
    /// to the pending record.
    ///
    /// # Errors
    /// Returns an error if the configured authorization URL is malformed
    pub fn authorization_url(&self, pending_id: &str) -> Result<String, url::ParseError> {
        let mut url = Url::parse(&self.config.authorize_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.callback_url)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", pending_id);
        Ok(url.into())
    }

    /// Exchange an upstream authorization code for upstream tokens
    ///
    /// # Errors
    /// See [`UpstreamError`]
    pub async fn exchange_code(&self, code: &str) -> Result<UpstreamToken, UpstreamError> {
        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.callback_url.as_str()),
        ];
        if let Some(ref secret) = self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        self.token_request(&params).await
    }

    /// Exchange a refresh token for fresh upstream tokens
    ///
    /// # Errors
    /// See [`UpstreamError`]
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<UpstreamToken, UpstreamError> {
        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        if let Some(ref secret) = self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        self.token_request(&params).await
    }

    /// POST a form-encoded grant to the upstream token endpoint
    async fn token_request(
        &self,
        params: &[(&str, &str)],
    ) -> Result<UpstreamToken, UpstreamError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: TokenResponseBody = response
                .json()
                .await
                .map_err(|e| UpstreamError::Malformed(e.to_string()))?;
            return Ok(UpstreamToken {
                access_token: body.access_token,
                refresh_token: body.refresh_token,
                expires_in: body.expires_in,
                scope: body.scope,
            });
        }

        if status.is_client_error() {
            // A 4xx is an OAuth-level denial when it parses as one
            let body = response.text().await.unwrap_or_default();
            return match serde_json::from_str::<ErrorResponseBody>(&body) {
                Ok(err) => Err(UpstreamError::Denied {
                    error: err.error,
                    description: err.error_description.unwrap_or_default(),
                }),
                Err(_) => Err(UpstreamError::Malformed(format!(
                    "HTTP {status} with non-OAuth body"
                ))),
            };
        }

        Err(UpstreamError::Malformed(format!(
            "HTTP {status} from upstream token endpoint"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> UpstreamConfig {
        UpstreamConfig {
            issuer: "https://idp.example.com".to_owned(),
            client_id: "broker_client".to_owned(),
            client_secret: None,
            authorize_url: "https://idp.example.com/oauth2/authorize".to_owned(),
            token_url: "https://idp.example.com/oauth2/token".to_owned(),
            jwks_url: "https://idp.example.com/oauth2/jwks".to_owned(),
            scopes: vec!["openid".to_owned(), "email".to_owned()],
            expected_audience: None,
        }
    }

    #[test]
    fn test_authorization_url_carries_pending_id_as_state() {
        let client = UpstreamClient::new(
            test_config(),
            "https://broker.example.com/auth/callback".to_owned(),
        );
        let url = client.authorization_url("pending-123").unwrap();
        let parsed = Url::parse(&url).unwrap();

        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().collect();
        assert_eq!(pairs["state"], "pending-123");
        assert_eq!(pairs["client_id"], "broker_client");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["scope"], "openid email");
        assert_eq!(
            pairs["redirect_uri"],
            "https://broker.example.com/auth/callback"
        );
    }
}
