//! Credential verification.
//!
//! Two strategies run in order and the first that applies wins:
//!
//! 1. **Trusted headers**: the API gateway has already validated the caller
//!    and forwards `X-User-Id` / `X-User-Role` (plus optional email, names and
//!    `X-Token-Jti`). The identity is built directly from those headers.
//! 2. **Bearer token**: `Authorization: Bearer <jwt>` is decoded with the
//!    shared HS256 secret.
//!
//! Both paths check the revocation list when a token id is known. Neither
//! path mutates state, so verification is safe to retry.

use std::sync::Arc;

use axum::http::{HeaderMap, header::AUTHORIZATION};

use crate::AuthResult;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::identity::{Identity, Role};
use crate::storage::RevocationList;
use crate::token::JwtService;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_FIRST_NAME_HEADER: &str = "x-user-first-name";
pub const USER_LAST_NAME_HEADER: &str = "x-user-last-name";
pub const TOKEN_JTI_HEADER: &str = "x-token-jti";

/// Verifies request credentials and produces an [`Identity`].
#[derive(Clone)]
pub struct CredentialVerifier {
    jwt: JwtService,
    revocations: Arc<dyn RevocationList>,
    trusted_headers: bool,
}

impl CredentialVerifier {
    #[must_use]
    pub fn new(jwt: JwtService, revocations: Arc<dyn RevocationList>) -> Self {
        Self {
            jwt,
            revocations,
            trusted_headers: true,
        }
    }

    #[must_use]
    pub fn from_config(config: &AuthConfig, revocations: Arc<dyn RevocationList>) -> Self {
        Self::new(
            JwtService::new(config.jwt_secret.as_bytes(), config.leeway_secs),
            revocations,
        )
        .with_trusted_headers(config.trusted_headers)
    }

    /// Enables or disables the gateway header strategy.
    #[must_use]
    pub fn with_trusted_headers(mut self, enabled: bool) -> Self {
        self.trusted_headers = enabled;
        self
    }

    #[must_use]
    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    #[must_use]
    pub fn revocations(&self) -> &Arc<dyn RevocationList> {
        &self.revocations
    }

    /// Verifies the credentials carried by `headers`.
    ///
    /// # Errors
    ///
    /// - `Malformed` if no usable credentials are present
    /// - `Expired` if the token's `exp` has passed
    /// - `Invalid` if the token cannot be decoded or its signature fails
    /// - `Revoked` if the token id is on the revocation list
    /// - `Storage` if the revocation list cannot be consulted
    pub async fn verify(&self, headers: &HeaderMap) -> AuthResult<Identity> {
        if self.trusted_headers
            && let Some(identity) = self.verify_trusted_headers(headers).await?
        {
            return Ok(identity);
        }
        self.verify_bearer(headers).await
    }

    /// Builds an identity from gateway headers.
    ///
    /// Returns `Ok(None)` when the headers are absent or unparsable so the
    /// bearer strategy can run. A revoked `X-Token-Jti` is still terminal.
    async fn verify_trusted_headers(&self, headers: &HeaderMap) -> AuthResult<Option<Identity>> {
        let (Some(raw_id), Some(raw_role)) = (
            header_str(headers, USER_ID_HEADER),
            header_str(headers, USER_ROLE_HEADER),
        ) else {
            return Ok(None);
        };

        let Ok(subject_id) = raw_id.parse::<i64>() else {
            tracing::debug!(value = raw_id, "Ignoring non-integer X-User-Id header");
            return Ok(None);
        };
        let role: Role = match raw_role.parse() {
            Ok(role) => role,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unknown X-User-Role header");
                return Ok(None);
            }
        };

        let jti = header_str(headers, TOKEN_JTI_HEADER).map(ToString::to_string);
        if let Some(ref jti) = jti {
            self.ensure_not_revoked(jti).await?;
        }

        let mut identity = Identity::new(subject_id, role);
        identity.email = header_str(headers, USER_EMAIL_HEADER).map(ToString::to_string);
        identity.given_name = header_str(headers, USER_FIRST_NAME_HEADER).map(ToString::to_string);
        identity.family_name = header_str(headers, USER_LAST_NAME_HEADER).map(ToString::to_string);
        identity.jti = jti;

        tracing::debug!(subject_id, role = %role, "Authenticated via trusted headers");
        Ok(Some(identity))
    }

    async fn verify_bearer(&self, headers: &HeaderMap) -> AuthResult<Identity> {
        let token = bearer_token(headers)?;

        let claims = self.jwt.decode(token).map_err(|e| {
            tracing::debug!(error = %e, "Failed to decode token");
            AuthError::from(e)
        })?;

        if let Some(ref jti) = claims.jti {
            self.ensure_not_revoked(jti).await?;
        }

        let identity = claims.into_identity()?;
        tracing::debug!(
            subject_id = identity.subject_id,
            role = %identity.role,
            "Authenticated via bearer token"
        );
        Ok(identity)
    }

    async fn ensure_not_revoked(&self, jti: &str) -> AuthResult<()> {
        if self.revocations.is_revoked(jti).await? {
            tracing::debug!(jti, "Token revoked");
            return Err(AuthError::Revoked);
        }
        Ok(())
    }
}

/// Extracts the token from `Authorization: Bearer <token>`.
///
/// # Errors
///
/// Returns `Malformed` when the header is absent, not ASCII, uses another
/// scheme or carries an empty token.
pub fn bearer_token(headers: &HeaderMap) -> AuthResult<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AuthError::malformed("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AuthError::malformed("Authorization header is not valid ASCII"))?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| AuthError::malformed("Authorization header must be 'Bearer <token>'"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::malformed(
            "Authorization header must be 'Bearer <token>'",
        ));
    }

    let token = token.trim();
    if token.is_empty() || token.contains(' ') {
        return Err(AuthError::malformed("Empty or malformed bearer token"));
    }
    Ok(token)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
