//! HS256 token signing and validation.
//!
//! All services share one secret distributed out-of-band. Signature
//! verification always runs; there is no switch to turn it off.
//!
//! ## Example
//!
//! ```ignore
//! use medsuite_auth::token::{JwtService, TokenClaims};
//!
//! let jwt = JwtService::new(secret.as_bytes(), 0);
//! let claims = TokenClaims::for_identity(&identity, time::Duration::hours(1));
//! let token = jwt.encode(&claims)?;
//! let decoded = jwt.decode(&token)?;
//! ```

use std::collections::HashSet;
use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::AuthError;
use crate::identity::{Identity, Role};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {message}")]
    EncodingError { message: String },

    /// Failed to decode a token.
    #[error("Failed to decode token: {message}")]
    DecodingError { message: String },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid.
    #[error("Invalid claims: {message}")]
    InvalidClaims { message: String },
}

impl JwtError {
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::Expired,
            JwtError::EncodingError { message } => AuthError::internal(message),
            other => AuthError::invalid(other.to_string()),
        }
    }
}

// ============================================================================
// Claims
// ============================================================================

/// Claims carried by access tokens.
///
/// The subject is accepted as either `user_id` or `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(alias = "id")]
    pub user_id: i64,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl TokenClaims {
    /// Builds claims for `identity` with a fresh `jti`, valid for `lifetime`.
    #[must_use]
    pub fn for_identity(identity: &Identity, lifetime: time::Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            user_id: identity.subject_id,
            role: identity.role.as_str().to_string(),
            email: identity.email.clone(),
            first_name: identity.given_name.clone(),
            last_name: identity.family_name.clone(),
            iat: Some(now.unix_timestamp()),
            exp: (now + lifetime).unix_timestamp(),
            jti: Some(uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Converts verified claims into an [`Identity`].
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if the role claim is not a known role.
    pub fn into_identity(self) -> Result<Identity, AuthError> {
        let role: Role = self
            .role
            .parse()
            .map_err(|_| AuthError::invalid(format!("unknown role claim '{}'", self.role)))?;

        Ok(Identity {
            subject_id: self.user_id,
            role,
            email: self.email,
            given_name: self.first_name,
            family_name: self.last_name,
            jti: self.jti,
            expires_at: Some(self.exp),
            extra: serde_json::Map::new(),
        })
    }
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<i64>,
}

// ============================================================================
// JWT Service
// ============================================================================

/// Signs and validates HS256 tokens with the shared secret.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    leeway_secs: u64,
}

impl fmt::Debug for JwtService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtService")
            .field("algorithm", &Algorithm::HS256)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

impl JwtService {
    #[must_use]
    pub fn new(secret: &[u8], leeway_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            leeway_secs,
        }
    }

    /// Signs `claims`.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn encode(&self, claims: &TokenClaims) -> Result<String, JwtError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    /// Decodes and validates a token.
    ///
    /// Expiry is checked before the signature so that an expired token is
    /// always reported as `Expired`, whatever its signature.
    ///
    /// # Errors
    /// Returns `Expired`, `InvalidSignature`, `InvalidClaims` or `DecodingError`.
    pub fn decode(&self, token: &str) -> Result<TokenClaims, JwtError> {
        if let Some(exp) = peek_expiry(token)? {
            let now = OffsetDateTime::now_utc().unix_timestamp();
            if exp.saturating_add(self.leeway_secs as i64) < now {
                return Err(JwtError::Expired);
            }
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway_secs;
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::from(["exp".to_string()]);

        let data = decode::<TokenClaims>(token, &self.decoding_key, &validation)?;
        let claims = data.claims;

        if let Some(iat) = claims.iat
            && claims.exp <= iat
        {
            return Err(JwtError::invalid_claims("exp must be after iat"));
        }

        Ok(claims)
    }
}

/// Reads `exp` from the payload without verifying the signature.
fn peek_expiry(token: &str) -> Result<Option<i64>, JwtError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(JwtError::decoding_error("token must have three segments"));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| JwtError::decoding_error(format!("payload is not base64url: {e}")))?;
    let claim: ExpiryClaim = serde_json::from_slice(&bytes)
        .map_err(|e| JwtError::decoding_error(format!("payload is not JSON: {e}")))?;
    Ok(claim.exp)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-0123456789";

    fn identity() -> Identity {
        let mut identity = Identity::new(42, Role::Doctor);
        identity.email = Some("house@example.org".into());
        identity.given_name = Some("Gregory".into());
        identity.family_name = Some("House".into());
        identity
    }

    #[test]
    fn test_encode_decode() {
        let jwt = JwtService::new(SECRET, 0);
        let claims = TokenClaims::for_identity(&identity(), time::Duration::hours(1));
        let token = jwt.encode(&claims).unwrap();

        let decoded = jwt.decode(&token).unwrap();
        assert_eq!(decoded, claims);
    }

    #[test]
    fn test_id_alias_accepted() {
        let jwt = JwtService::new(SECRET, 0);
        let exp = OffsetDateTime::now_utc().unix_timestamp() + 600;
        let payload = serde_json::json!({ "id": 9, "role": "NURSE", "exp": exp });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &payload,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        let claims = jwt.decode(&token).unwrap();
        assert_eq!(claims.user_id, 9);
        assert_eq!(claims.jti, None);
    }

    #[test]
    fn test_wrong_secret_is_invalid_signature() {
        let issuer = JwtService::new(b"another-secret-987654321", 0);
        let verifier = JwtService::new(SECRET, 0);
        let claims = TokenClaims::for_identity(&identity(), time::Duration::hours(1));
        let token = issuer.encode(&claims).unwrap();

        assert!(matches!(
            verifier.decode(&token),
            Err(JwtError::InvalidSignature)
        ));
    }

    #[test]
    fn test_expired_reported_before_signature() {
        let issuer = JwtService::new(b"another-secret-987654321", 0);
        let verifier = JwtService::new(SECRET, 0);
        let claims = TokenClaims::for_identity(&identity(), time::Duration::hours(-1));
        let token = issuer.encode(&claims).unwrap();

        assert!(matches!(verifier.decode(&token), Err(JwtError::Expired)));
    }

    #[test]
    fn test_garbage_token() {
        let jwt = JwtService::new(SECRET, 0);
        assert!(matches!(
            jwt.decode("not-a-token"),
            Err(JwtError::DecodingError { .. })
        ));
        assert!(matches!(
            jwt.decode("a.b.c"),
            Err(JwtError::DecodingError { .. })
        ));
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(AuthError::from(JwtError::Expired), AuthError::Expired));
        assert!(matches!(
            AuthError::from(JwtError::InvalidSignature),
            AuthError::Invalid { .. }
        ));
    }

    #[test]
    fn test_into_identity_rejects_unknown_role() {
        let mut claims = TokenClaims::for_identity(&identity(), time::Duration::hours(1));
        claims.role = "JANITOR".into();
        assert!(matches!(
            claims.into_identity(),
            Err(AuthError::Invalid { .. })
        ));
    }
}
