// ABOUTME: Bearer token verification against the upstream JWKS
// ABOUTME: Validates RS256 JWTs and derives the per-request auth context
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP OAuth Broker Contributors

//! # Bearer Token Verification
//!
//! Every protected request carries a bearer JWT issued by the upstream
//! identity provider. The verifier checks signature (RS256 via the cached
//! JWKS), issuer, expiry, not-before, and - when configured - audience,
//! then derives a fresh [`AuthContext`]. Verification results are never
//! cached across requests: tokens are short-lived and revocation must be
//! observable promptly.

use crate::constants::oauth;
use crate::errors::{AppError, AppResult};
use crate::jwks::RemoteJwks;
use crate::models::AuthContext;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Claims carried by upstream-issued bearer tokens
///
/// `aud` is kept as a raw value because the claim may be a string or an
/// array; audience enforcement happens manually against `aud`/`azp`.
#[derive(Debug, Deserialize)]
pub struct Claims {
    /// Subject (end user or machine client)
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Expiration timestamp
    pub exp: i64,
    /// Audience (string or array)
    #[serde(default)]
    pub aud: Option<Value>,
    /// Authorized party
    #[serde(default)]
    pub azp: Option<String>,
    /// Organization identifier
    #[serde(default)]
    pub org_id: Option<String>,
    /// Subject email
    #[serde(default)]
    pub email: Option<String>,
    /// Space-delimited granted scopes
    #[serde(default)]
    pub scope: Option<String>,
    /// Grant type that produced the token (`client_credentials` marks
    /// machine-to-machine tokens)
    #[serde(default)]
    pub grant_type: Option<String>,
}

/// Bearer token verifier
///
/// Holds the injected JWKS cache and the expected issuer/audience. One
/// verifier instance serves the whole process; each call re-validates from
/// scratch against the cached key set.
pub struct TokenVerifier {
    jwks: Arc<RemoteJwks>,
    issuer: String,
    expected_audience: Option<String>,
}

impl TokenVerifier {
    /// Create a verifier for tokens from the given issuer
    #[must_use]
    pub const fn new(jwks: Arc<RemoteJwks>, issuer: String, expected_audience: Option<String>) -> Self {
        Self {
            jwks,
            issuer,
            expected_audience,
        }
    }

    /// Verify a bearer token and derive its [`AuthContext`]
    ///
    /// # Errors
    /// - `AuthInvalid`/`AuthExpired` (401-class) for malformed, mis-signed,
    ///   mis-issued, expired, not-yet-valid, or audience-mismatched tokens
    /// - a 5xx-class dependency error when the JWKS cannot be fetched at
    ///   all - a dependency outage is not the client's fault
    pub async fn verify(&self, token: &str) -> AppResult<AuthContext> {
        let header = decode_header(token)
            .map_err(|e| AppError::auth_invalid(format!("Malformed token header: {e}")))?;

        if header.alg != Algorithm::RS256 {
            return Err(AppError::auth_invalid(format!(
                "Unsupported token algorithm: {:?}",
                header.alg
            )));
        }

        // Dependency errors from the JWKS cache propagate as 5xx
        let key_set = self.jwks.get().await?;

        let jwk = match header.kid.as_deref() {
            Some(kid) => key_set.find(kid).ok_or_else(|| {
                AppError::auth_invalid(format!("Token references unknown key: {kid}"))
            })?,
            // No kid: unambiguous only when the set has a single key
            None => match key_set.keys.as_slice() {
                [only] => only,
                _ => {
                    return Err(AppError::auth_invalid(
                        "Token header missing kid and JWKS has multiple keys",
                    ))
                }
            },
        };

        let decoding_key = DecodingKey::from_jwk(jwk)
            .map_err(|e| AppError::auth_invalid(format!("Unusable JWKS key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        // Audience is enforced manually below so azp can satisfy it too
        validation.validate_aud = false;

        let data = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|e| Self::map_jwt_error(&e))?;
        let claims = data.claims;

        self.check_audience(&claims)?;

        let token_expiry = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| AppError::auth_invalid("Token exp claim out of range"))?;

        let is_machine_to_machine = claims.grant_type.as_deref() == Some("client_credentials")
            || claims.sub.starts_with(oauth::MACHINE_SUBJECT_PREFIX);

        let scopes = claims
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().map(ToOwned::to_owned).collect())
            .unwrap_or_default();

        tracing::debug!(
            sub = %claims.sub,
            m2m = is_machine_to_machine,
            "Bearer token verified"
        );

        Ok(AuthContext {
            subject: claims.sub,
            organization_id: claims.org_id,
            is_machine_to_machine,
            email: claims.email,
            scopes,
            token_expiry,
        })
    }

    /// Enforce the configured audience against `aud` or `azp`
    fn check_audience(&self, claims: &Claims) -> AppResult<()> {
        let Some(expected) = self.expected_audience.as_deref() else {
            return Ok(());
        };

        let aud_matches = match &claims.aud {
            Some(Value::String(aud)) => aud == expected,
            Some(Value::Array(auds)) => auds.iter().any(|a| a.as_str() == Some(expected)),
            _ => false,
        };
        let azp_matches = claims.azp.as_deref() == Some(expected);

        if aud_matches || azp_matches {
            Ok(())
        } else {
            tracing::warn!(sub = %claims.sub, "Token audience mismatch");
            Err(AppError::auth_invalid("Token audience mismatch"))
        }
    }

    /// Map jsonwebtoken errors to the auth error taxonomy
    fn map_jwt_error(e: &jsonwebtoken::errors::Error) -> AppError {
        use jsonwebtoken::errors::ErrorKind;

        match e.kind() {
            ErrorKind::ExpiredSignature => AppError::auth_expired(),
            ErrorKind::ImmatureSignature => {
                AppError::auth_invalid("Token is not yet valid (nbf in the future)")
            }
            ErrorKind::InvalidIssuer => AppError::auth_invalid("Token issuer mismatch"),
            ErrorKind::InvalidSignature => {
                AppError::auth_invalid("Token signature verification failed")
            }
            _ => AppError::auth_invalid(format!("Token validation failed: {e}")),
        }
    }
}
