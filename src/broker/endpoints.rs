// ABOUTME: OAuth 2.1 broker protocol operations
// ABOUTME: Authorize, upstream callback, PKCE challenge recovery, and single-use code exchange
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

//! Broker protocol state machine
//!
//! One authorization attempt moves through:
//! pending record created -> user redirected upstream -> upstream callback
//! -> broker code minted -> code exchanged (record deleted, terminal).
//! A failed attempt must still land the user-agent back on the client's
//! `redirect_uri` with an OAuth `error` and the original `state` whenever
//! that URI is known; only a truly unknown pending id gets a direct 400.

use super::client_registration::ClientRegistrationManager;
use super::models::{AuthorizeRequest, CallbackParams, OAuthError, TokenRequest, TokenResponse};
use crate::config::ServerConfig;
use crate::constants::oauth;
use crate::database_plugins::{Database, DatabaseProvider};
use crate::errors::{AppError, AppResult};
use crate::models::{AuthorizationCode, PendingAuthorization};
use crate::upstream::{UpstreamClient, UpstreamError};
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Why an authorization request was rejected, and where the rejection goes
#[derive(Debug)]
pub enum AuthorizeRejection {
    /// No trustworthy redirect target exists; answer the request directly
    Direct(OAuthError),
    /// The client and redirect URI checked out; deliver the error by
    /// redirect so the client's flow terminates cleanly
    Redirect {
        /// Validated client redirect URI
        redirect_uri: String,
        /// OAuth error to deliver
        error: OAuthError,
        /// Original opaque client state
        state: Option<String>,
    },
}

/// Result of handling the upstream callback
#[derive(Debug)]
pub enum CallbackOutcome {
    /// Redirect the user-agent to this URL (success or error delivery)
    RedirectToClient(String),
    /// The pending record is unknown; there is nowhere safe to redirect
    Failed(OAuthError),
}

/// OAuth 2.1 broker
///
/// Stateless across requests: every operation round-trips through the
/// shared store, so any process instance can serve any step of a flow.
pub struct OAuthBroker {
    database: Arc<Database>,
    registry: ClientRegistrationManager,
    upstream: Arc<UpstreamClient>,
    config: Arc<ServerConfig>,
}

impl OAuthBroker {
    /// Create a new broker over the shared store and upstream client
    #[must_use]
    pub const fn new(
        database: Arc<Database>,
        registry: ClientRegistrationManager,
        upstream: Arc<UpstreamClient>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            database,
            registry,
            upstream,
            config,
        }
    }

    /// The registration manager (used by the /register route)
    #[must_use]
    pub const fn registry(&self) -> &ClientRegistrationManager {
        &self.registry
    }

    /// Begin an authorization attempt
    ///
    /// Validates the client and PKCE parameters, persists a pending
    /// authorization, and returns the upstream authorization URL carrying
    /// the broker's `pending_id` as the upstream `state`. No tokens are
    /// issued here.
    ///
    /// # Errors
    /// Returns [`AuthorizeRejection`] describing whether the failure can be
    /// delivered by redirect
    pub async fn authorize(
        &self,
        request: AuthorizeRequest,
    ) -> Result<String, AuthorizeRejection> {
        let client = self
            .registry
            .lookup(&request.client_id)
            .await
            .map_err(AuthorizeRejection::Direct)?;

        // An unvalidated redirect URI is never a redirect target
        if !client.allows_redirect_uri(&request.redirect_uri) {
            tracing::warn!(
                client_id = %request.client_id,
                redirect_uri = %request.redirect_uri,
                "Authorization rejected: redirect_uri not registered for client"
            );
            return Err(AuthorizeRejection::Direct(OAuthError::invalid_request(
                "redirect_uri is not registered for this client",
            )));
        }

        let reject = |error: OAuthError| AuthorizeRejection::Redirect {
            redirect_uri: request.redirect_uri.clone(),
            error,
            state: request.state.clone(),
        };

        if request.response_type != "code" {
            return Err(reject(OAuthError::unsupported_response_type()));
        }

        let code_challenge = match request.code_challenge.as_deref() {
            None => {
                return Err(reject(OAuthError::invalid_request(
                    "code_challenge is required for the authorization_code flow (PKCE)",
                )))
            }
            Some(challenge)
                if challenge.len() < oauth::PKCE_MIN_LENGTH
                    || challenge.len() > oauth::PKCE_MAX_LENGTH =>
            {
                return Err(reject(OAuthError::invalid_request(
                    "code_challenge must be between 43 and 128 characters",
                )))
            }
            Some(challenge) => challenge.to_owned(),
        };

        let method = request
            .code_challenge_method
            .as_deref()
            .unwrap_or(oauth::PKCE_METHOD_S256);
        if method != oauth::PKCE_METHOD_S256 {
            return Err(reject(OAuthError::invalid_request(
                "code_challenge_method must be 'S256'",
            )));
        }

        let pending_id = generate_random_id().map_err(|e| {
            tracing::error!(error = %e, "Failed to generate pending id");
            AuthorizeRejection::Direct(OAuthError::server_error("Failed to start authorization"))
        })?;

        let pending = PendingAuthorization {
            pending_id: pending_id.clone(),
            client_id: client.client_id().to_owned(),
            redirect_uri: request.redirect_uri.clone(),
            code_challenge,
            state: request.state.clone(),
            scopes: request.scope.clone(),
            resource: request.resource.clone(),
            created_at: Utc::now(),
        };

        self.database
            .create_pending_auth(&pending)
            .await
            .map_err(|e| {
                if e.is_duplicate() {
                    // 256-bit ids do not collide; a duplicate here means the
                    // RNG is broken. Alert, never retry with fresh randomness.
                    tracing::error!(
                        client_id = %request.client_id,
                        "Pending id collision on insert - possible RNG failure"
                    );
                } else {
                    tracing::error!(error = %e, client_id = %request.client_id, "Failed to store pending authorization");
                }
                AuthorizeRejection::Direct(OAuthError::server_error(
                    "Failed to start authorization",
                ))
            })?;

        tracing::info!(
            client_id = %request.client_id,
            pending_id_len = pending_id.len(),
            "Authorization started, redirecting to upstream IdP"
        );

        self.upstream
            .authorization_url(&pending_id)
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to build upstream authorization URL");
                AuthorizeRejection::Direct(OAuthError::server_error(
                    "Failed to build upstream authorization URL",
                ))
            })
    }

    /// Handle the upstream IdP's redirect back to the broker
    ///
    /// Consumes the pending authorization exactly once (a replayed or stale
    /// callback URL fails with a 400), exchanges the upstream code for
    /// upstream tokens, mints the broker's own single-use code, and
    /// redirects to the original client. Upstream failures still redirect
    /// to the client with `error`/`error_description` and the original
    /// `state` so the client's flow is not left hanging.
    pub async fn handle_callback(&self, params: CallbackParams) -> CallbackOutcome {
        let Some(pending_id) = params.state.as_deref() else {
            return CallbackOutcome::Failed(OAuthError::invalid_request(
                "Missing state parameter on callback",
            ));
        };

        let cutoff = Utc::now() - Duration::seconds(self.pending_ttl_secs());
        let pending = match self.database.consume_pending_auth(pending_id, cutoff).await {
            Ok(Some(pending)) => pending,
            Ok(None) => {
                // Replayed, stale, or fabricated callback URL. Same answer
                // for all three.
                tracing::warn!("Callback with unknown or already-consumed pending id");
                return CallbackOutcome::Failed(OAuthError::invalid_request(
                    "Authorization request expired or not found",
                ));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to consume pending authorization");
                return CallbackOutcome::Failed(OAuthError::server_error(
                    "Failed to process callback",
                ));
            }
        };

        // From here on the client's redirect URI is known; every outcome is
        // delivered by redirect.
        if let Some(upstream_error) = params.error.as_deref() {
            tracing::warn!(
                client_id = %pending.client_id,
                upstream_error = %upstream_error,
                "Upstream IdP reported an authorization error"
            );
            let description = params
                .error_description
                .unwrap_or_else(|| "The upstream identity provider denied the request".to_owned());
            return CallbackOutcome::RedirectToClient(error_redirect_url(
                &pending.redirect_uri,
                &OAuthError::access_denied(&description),
                pending.state.as_deref(),
            ));
        }

        let Some(upstream_code) = params.code.as_deref() else {
            return CallbackOutcome::RedirectToClient(error_redirect_url(
                &pending.redirect_uri,
                &OAuthError::invalid_request("Missing authorization code on callback"),
                pending.state.as_deref(),
            ));
        };

        let token = match self.upstream.exchange_code(upstream_code).await {
            Ok(token) => token,
            Err(e) => {
                let error = match &e {
                    UpstreamError::Denied { .. } => {
                        OAuthError::access_denied("The upstream identity provider rejected the authorization code")
                    }
                    UpstreamError::Unavailable(_) | UpstreamError::Malformed(_) => {
                        OAuthError::server_error("The upstream identity provider is unavailable")
                    }
                };
                tracing::error!(
                    error = %e,
                    client_id = %pending.client_id,
                    operation = "exchange_code",
                    "Upstream token exchange failed"
                );
                return CallbackOutcome::RedirectToClient(error_redirect_url(
                    &pending.redirect_uri,
                    &error,
                    pending.state.as_deref(),
                ));
            }
        };

        let code = match generate_random_id() {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(error = %e, "Failed to generate authorization code");
                return CallbackOutcome::RedirectToClient(error_redirect_url(
                    &pending.redirect_uri,
                    &OAuthError::server_error("Failed to issue authorization code"),
                    pending.state.as_deref(),
                ));
            }
        };

        let auth_code = AuthorizationCode {
            code: code.clone(),
            client_id: pending.client_id.clone(),
            code_challenge: pending.code_challenge.clone(),
            redirect_uri: pending.redirect_uri.clone(),
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            created_at: Utc::now(),
        };

        if let Err(e) = self.database.store_auth_code(&auth_code).await {
            if e.is_duplicate() {
                tracing::error!(
                    client_id = %pending.client_id,
                    "Authorization code collision on insert - possible RNG failure"
                );
            } else {
                tracing::error!(error = %e, client_id = %pending.client_id, "Failed to store authorization code");
            }
            return CallbackOutcome::RedirectToClient(error_redirect_url(
                &pending.redirect_uri,
                &OAuthError::server_error("Failed to issue authorization code"),
                pending.state.as_deref(),
            ));
        }

        tracing::info!(
            client_id = %pending.client_id,
            "Upstream callback complete, redirecting to client with broker code"
        );

        CallbackOutcome::RedirectToClient(success_redirect_url(
            &pending.redirect_uri,
            &code,
            pending.state.as_deref(),
        ))
    }

    /// Recover the PKCE challenge for a code without consuming it
    ///
    /// The challenge must be re-exposed so the caller can verify the
    /// client-supplied `code_verifier` *before* any token material is
    /// released. Both this peek and the later consumption see the same
    /// underlying row.
    ///
    /// # Errors
    /// `invalid_grant` when the code is unknown/expired or owned by a
    /// different client
    pub async fn challenge_for_authorization_code(
        &self,
        client_id: &str,
        code: &str,
    ) -> Result<String, OAuthError> {
        let cutoff = Utc::now() - Duration::seconds(self.code_ttl_secs());
        let record = self
            .database
            .get_auth_code(code, cutoff)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, client_id = %client_id, "Authorization code lookup failed");
                OAuthError::server_error("Authorization code lookup failed")
            })?
            .ok_or_else(|| {
                tracing::warn!(client_id = %client_id, "Authorization code not found, expired, or already used");
                OAuthError::invalid_grant("Invalid or expired authorization code")
            })?;

        if record.client_id != client_id {
            tracing::warn!(
                client_id = %client_id,
                owner = %record.client_id,
                "Client mismatch on authorization code challenge lookup"
            );
            return Err(OAuthError::invalid_grant(
                "Authorization code was not issued to this client",
            ));
        }

        Ok(record.code_challenge)
    }

    /// Verify a PKCE `code_verifier` against a stored S256 challenge
    ///
    /// # Errors
    /// `invalid_grant` on format violations or challenge mismatch
    pub fn verify_code_verifier(
        client_id: &str,
        code_verifier: &str,
        code_challenge: &str,
    ) -> Result<(), OAuthError> {
        // RFC 7636 §4.1: 43-128 unreserved characters
        if code_verifier.len() < oauth::PKCE_MIN_LENGTH
            || code_verifier.len() > oauth::PKCE_MAX_LENGTH
        {
            return Err(OAuthError::invalid_grant(
                "code_verifier must be between 43 and 128 characters",
            ));
        }
        if !code_verifier
            .chars()
            .all(|c| matches!(c, 'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '.' | '_' | '~'))
        {
            return Err(OAuthError::invalid_grant(
                "code_verifier contains invalid characters",
            ));
        }

        let mut hasher = Sha256::new();
        hasher.update(code_verifier.as_bytes());
        let computed = general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize());

        // Constant-time comparison to prevent timing attacks
        if computed.as_bytes().ct_eq(code_challenge.as_bytes()).into() {
            tracing::debug!(client_id = %client_id, "PKCE verification successful");
            Ok(())
        } else {
            tracing::warn!(
                client_id = %client_id,
                "PKCE verification failed - code_verifier does not match code_challenge"
            );
            Err(OAuthError::invalid_grant("Invalid code_verifier"))
        }
    }

    /// Atomically consume an authorization code and release its tokens
    ///
    /// The row is consumed first and validated after, so a mismatched
    /// attempt burns the code: replay or double-exchange of a stolen code
    /// fails on every attempt after the first, and the "not found" answer
    /// does not reveal whether the code ever existed.
    ///
    /// # Errors
    /// `invalid_grant` when the code is absent (used, expired, or never
    /// issued), owned by another client, or bound to a different
    /// `redirect_uri`
    pub async fn exchange_authorization_code(
        &self,
        client_id: &str,
        code: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenResponse, OAuthError> {
        let cutoff = Utc::now() - Duration::seconds(self.code_ttl_secs());
        let record = self
            .database
            .consume_auth_code(code, cutoff)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, client_id = %client_id, "Failed to consume authorization code");
                OAuthError::server_error("Failed to consume authorization code")
            })?
            .ok_or_else(|| {
                tracing::warn!(
                    client_id = %client_id,
                    "Authorization code not found: already used, expired, or never issued"
                );
                OAuthError::invalid_grant("Invalid or expired authorization code")
            })?;

        if record.client_id != client_id {
            tracing::warn!(
                client_id = %client_id,
                owner = %record.client_id,
                "Client mismatch on authorization code exchange"
            );
            return Err(OAuthError::invalid_grant(
                "Authorization code was not issued to this client",
            ));
        }

        // RFC 6749 §4.1.3: the redirect_uri at exchange must match the one
        // the code was delivered to (authorization-code injection defense)
        if !record.redirect_uri.is_empty() {
            match redirect_uri {
                Some(supplied) if supplied == record.redirect_uri => {}
                _ => {
                    tracing::warn!(
                        client_id = %client_id,
                        "redirect_uri mismatch on authorization code exchange"
                    );
                    return Err(OAuthError::invalid_grant(
                        "redirect_uri does not match the authorization request",
                    ));
                }
            }
        }

        tracing::info!(client_id = %client_id, "Authorization code exchanged");

        Ok(TokenResponse {
            access_token: record.access_token,
            token_type: oauth::TOKEN_TYPE_BEARER.to_owned(),
            expires_in: None,
            scope: None,
            refresh_token: record.refresh_token,
        })
    }

    /// Forward a refresh grant to the upstream IdP
    ///
    /// Refresh is a distinct grant type; the broker does not re-validate
    /// PKCE here.
    ///
    /// # Errors
    /// `invalid_grant` when the upstream rejects the token;
    /// `temporarily_unavailable` when the upstream is unreachable
    pub async fn exchange_refresh_token(
        &self,
        client_id: &str,
        refresh_token: &str,
    ) -> Result<TokenResponse, OAuthError> {
        let token = self
            .upstream
            .refresh_token(refresh_token)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    client_id = %client_id,
                    operation = "refresh_token",
                    "Upstream refresh failed"
                );
                match e {
                    UpstreamError::Denied { .. } => {
                        OAuthError::invalid_grant("Refresh token was rejected by the upstream identity provider")
                    }
                    UpstreamError::Unavailable(_) => OAuthError::temporarily_unavailable(
                        "The upstream identity provider is unreachable",
                    ),
                    UpstreamError::Malformed(_) => {
                        OAuthError::server_error("Unexpected response from the upstream identity provider")
                    }
                }
            })?;

        tracing::info!(client_id = %client_id, "Refresh token exchanged upstream");

        Ok(TokenResponse {
            access_token: token.access_token,
            token_type: oauth::TOKEN_TYPE_BEARER.to_owned(),
            expires_in: token.expires_in,
            scope: token.scope,
            refresh_token: token.refresh_token,
        })
    }

    /// Full token-endpoint dispatch for an `authorization_code` grant:
    /// challenge recovery, PKCE verification, then atomic exchange
    ///
    /// # Errors
    /// Propagates the protocol errors of each step
    pub async fn token(&self, request: TokenRequest) -> Result<TokenResponse, OAuthError> {
        match request.grant_type.as_str() {
            "authorization_code" => {
                let code = request
                    .code
                    .as_deref()
                    .ok_or_else(|| OAuthError::invalid_request("Missing authorization code"))?;
                let verifier = request.code_verifier.as_deref().ok_or_else(|| {
                    OAuthError::invalid_request("code_verifier is required (PKCE)")
                })?;

                // Verify the verifier against the stored challenge before
                // releasing any token material, then consume exactly once.
                let challenge = self
                    .challenge_for_authorization_code(&request.client_id, code)
                    .await?;
                Self::verify_code_verifier(&request.client_id, verifier, &challenge)?;
                self.exchange_authorization_code(
                    &request.client_id,
                    code,
                    request.redirect_uri.as_deref(),
                )
                .await
            }
            "refresh_token" => {
                let refresh_token = request
                    .refresh_token
                    .as_deref()
                    .ok_or_else(|| OAuthError::invalid_request("Missing refresh_token"))?;
                self.exchange_refresh_token(&request.client_id, refresh_token)
                    .await
            }
            _ => Err(OAuthError::unsupported_grant_type()),
        }
    }

    /// Pending authorization TTL in seconds, as a signed value for chrono
    fn pending_ttl_secs(&self) -> i64 {
        i64::try_from(self.config.broker.pending_auth_ttl_secs).unwrap_or(i64::MAX)
    }

    /// Authorization code TTL in seconds, as a signed value for chrono
    fn code_ttl_secs(&self) -> i64 {
        i64::try_from(self.config.broker.auth_code_ttl_secs).unwrap_or(i64::MAX)
    }
}

/// Build the success redirect URL back to the client
fn success_redirect_url(redirect_uri: &str, code: &str, state: Option<&str>) -> String {
    let mut url = format!(
        "{redirect_uri}{}code={}",
        query_separator(redirect_uri),
        urlencoding::encode(code)
    );
    if let Some(state) = state {
        use std::fmt::Write;
        write!(&mut url, "&state={}", urlencoding::encode(state)).ok();
    }
    url
}

/// Build an error redirect URL back to the client, carrying the original state
pub(crate) fn error_redirect_url(
    redirect_uri: &str,
    error: &OAuthError,
    state: Option<&str>,
) -> String {
    let mut url = format!(
        "{redirect_uri}{}error={}",
        query_separator(redirect_uri),
        urlencoding::encode(&error.error)
    );
    use std::fmt::Write;
    if let Some(ref description) = error.error_description {
        write!(
            &mut url,
            "&error_description={}",
            urlencoding::encode(description)
        )
        .ok();
    }
    if let Some(state) = state {
        write!(&mut url, "&state={}", urlencoding::encode(state)).ok();
    }
    url
}

/// Pick `?` or `&` depending on whether the URI already has a query
fn query_separator(uri: &str) -> char {
    if uri.contains('?') {
        '&'
    } else {
        '?'
    }
}

/// Generate an unguessable identifier (256 bits, URL-safe base64)
///
/// # Errors
/// Returns an error if the system RNG fails - the broker cannot operate
/// securely without working randomness
pub(crate) fn generate_random_id() -> AppResult<String> {
    let rng = SystemRandom::new();
    let mut bytes = vec![0u8; oauth::CODE_LENGTH_BYTES];
    rng.fill(&mut bytes).map_err(|e| {
        tracing::error!("CRITICAL: SystemRandom failed - cannot generate secure random bytes: {e:?}");
        AppError::internal("System RNG failure - server cannot operate securely")
    })?;
    Ok(general_purpose::URL_SAFE_NO_PAD.encode(&bytes))
}
