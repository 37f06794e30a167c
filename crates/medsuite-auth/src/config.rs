//! Authentication configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth]
//! jwt_secret = "injected-from-environment"
//! trusted_headers = true
//! session_ttl = "1d"
//! max_sessions_per_user = 5
//! ```
//!
//! The signing secret has no default. It must come from the deployment
//! (usually `MEDSUITE__AUTH__JWT_SECRET`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::rbac::DEFAULT_OWNER_FIELDS;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared HS256 secret distributed to every service.
    pub jwt_secret: String,

    /// Accept gateway-injected `X-User-*` headers.
    pub trusted_headers: bool,

    /// Clock skew tolerated when checking `exp`, in seconds.
    pub leeway_secs: u64,

    /// Lifetime of access tokens issued by [`crate::token::JwtService`].
    /// Also used as the revocation TTL when a token's expiry is unknown.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// TTL of `session:{id}` records.
    #[serde(with = "humantime_serde")]
    pub session_ttl: Duration,

    /// Soft cap on concurrent sessions per user. Exceeding it is logged only.
    pub max_sessions_per_user: usize,

    /// Object fields searched for the owner when a rule does not name one.
    pub owner_fields: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            trusted_headers: true,
            leeway_secs: 0,
            access_token_lifetime: Duration::from_secs(60 * 60),
            session_ttl: Duration::from_secs(24 * 60 * 60),
            max_sessions_per_user: 5,
            owner_fields: DEFAULT_OWNER_FIELDS.iter().map(|f| (*f).to_string()).collect(),
        }
    }
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "auth.jwt_secret".into(),
            });
        }
        if self.jwt_secret.len() < 16 {
            return Err(ConfigError::invalid(
                "auth.jwt_secret",
                "must be at least 16 bytes",
            ));
        }
        if self.session_ttl.is_zero() {
            return Err(ConfigError::invalid("auth.session_ttl", "must be > 0"));
        }
        if self.access_token_lifetime.is_zero() {
            return Err(ConfigError::invalid(
                "auth.access_token_lifetime",
                "must be > 0",
            ));
        }
        if self.max_sessions_per_user == 0 {
            return Err(ConfigError::invalid(
                "auth.max_sessions_per_user",
                "must be > 0",
            ));
        }
        if self.owner_fields.is_empty() {
            return Err(ConfigError::invalid(
                "auth.owner_fields",
                "must list at least one field",
            ));
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Missing required field: {field}")]
    Missing { field: String },
}

impl ConfigError {
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AuthConfig {
        AuthConfig {
            jwt_secret: "0123456789abcdef0123".into(),
            ..AuthConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let cfg = AuthConfig::default();
        assert!(cfg.trusted_headers);
        assert_eq!(cfg.session_ttl, Duration::from_secs(86_400));
        assert_eq!(cfg.owner_fields, vec!["patient_id", "user_id", "owner_id"]);
    }

    #[test]
    fn test_missing_secret_rejected() {
        let err = AuthConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
    }

    #[test]
    fn test_short_secret_rejected() {
        let cfg = AuthConfig {
            jwt_secret: "short".into(),
            ..AuthConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_parse_humantime() {
        let cfg: AuthConfig = serde_json::from_value(serde_json::json!({
            "jwt_secret": "0123456789abcdef0123",
            "session_ttl": "2h",
            "access_token_lifetime": "15m"
        }))
        .unwrap();
        assert_eq!(cfg.session_ttl, Duration::from_secs(7200));
        assert_eq!(cfg.access_token_lifetime, Duration::from_secs(900));
        assert_eq!(cfg.max_sessions_per_user, 5);
    }
}
