//! Revoked token list.
//!
//! A token is revoked when `blacklist_token:{jti}` holds any non-empty value.
//! Entries expire on their own once the token would have expired anyway, so
//! no cleanup job is needed.

use std::time::Duration;

use async_trait::async_trait;

use crate::AuthResult;

/// Cache key for a revoked token id.
#[must_use]
pub fn revocation_key(jti: &str) -> String {
    format!("blacklist_token:{jti}")
}

/// Shared revocation list keyed by token id.
#[async_trait]
pub trait RevocationList: Send + Sync {
    /// Returns `true` if `jti` has been revoked.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the cache is unreachable.
    async fn is_revoked(&self, jti: &str) -> AuthResult<bool>;

    /// Marks `jti` revoked for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the cache is unreachable.
    async fn revoke(&self, jti: &str, ttl: Duration) -> AuthResult<()>;
}
