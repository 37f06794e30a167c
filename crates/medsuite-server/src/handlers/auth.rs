use std::time::Duration;

use axum::{Json, extract::State};
use medsuite_auth::AuthError;
use medsuite_auth::middleware::Authenticated;
use serde_json::{Value, json};
use time::OffsetDateTime;

use crate::error::ApiError;
use crate::server::AppState;

/// `POST /api/auth/logout/`: revokes the caller's token until it expires.
pub async fn logout(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
) -> Result<Json<Value>, ApiError> {
    let Some(jti) = identity.jti.as_deref() else {
        return Err(AuthError::malformed("credentials carry no token id").into());
    };

    let ttl = remaining_lifetime(identity.expires_at, state.config.auth.access_token_lifetime);
    state.auth.verifier.revocations().revoke(jti, ttl).await?;

    tracing::info!(
        jti,
        subject_id = identity.subject_id,
        ttl_secs = ttl.as_secs(),
        "Token revoked on logout"
    );
    Ok(Json(json!({ "detail": "Logged out" })))
}

/// Time left until `expires_at` (at least one second), or `fallback` when
/// the expiry is unknown.
fn remaining_lifetime(expires_at: Option<i64>, fallback: Duration) -> Duration {
    match expires_at {
        Some(exp) => {
            let left = exp.saturating_sub(OffsetDateTime::now_utc().unix_timestamp());
            Duration::from_secs(left.max(1) as u64)
        }
        None => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_lifetime() {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let fallback = Duration::from_secs(3600);

        let left = remaining_lifetime(Some(now + 120), fallback);
        assert!(left <= Duration::from_secs(120) && left >= Duration::from_secs(118));

        assert_eq!(remaining_lifetime(Some(now - 30), fallback), Duration::from_secs(1));
        assert_eq!(remaining_lifetime(None, fallback), fallback);
    }
}
