//! Axum extractor for authenticated requests.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use medsuite_auth::middleware::{AuthState, Authenticated};
//!
//! async fn me(Authenticated(identity): Authenticated) -> String {
//!     format!("Hello, {}!", identity.subject_id)
//! }
//!
//! let app = Router::new().route("/me", get(me)).with_state(auth_state);
//! ```

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header::USER_AGENT, request::Parts},
};

use crate::error::AuthError;
use crate::identity::Identity;
use crate::rbac::RbacEngine;
use crate::storage::SessionTracker;
use crate::verifier::CredentialVerifier;

pub const SESSION_ID_HEADER: &str = "x-session-id";

// =============================================================================
// Auth State
// =============================================================================

/// State required by the [`Authenticated`] extractor.
///
/// Include it in the application state and expose it through `FromRef`.
#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<CredentialVerifier>,
    pub rbac: Arc<RbacEngine>,
    /// Session bookkeeping; `None` disables it.
    pub sessions: Option<SessionTracker>,
}

impl AuthState {
    #[must_use]
    pub fn new(verifier: Arc<CredentialVerifier>, rbac: Arc<RbacEngine>) -> Self {
        Self {
            verifier,
            rbac,
            sessions: None,
        }
    }

    #[must_use]
    pub fn with_sessions(mut self, sessions: SessionTracker) -> Self {
        self.sessions = Some(sessions);
        self
    }
}

// =============================================================================
// Extractor
// =============================================================================

/// Extractor that verifies credentials and yields the caller's [`Identity`].
///
/// On success the session (named by `X-Session-Id`, or the token id) is
/// touched. Session failures never reject the request.
pub struct Authenticated(pub Identity);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_state = AuthState::from_ref(state);

        let identity = auth_state.verifier.verify(&parts.headers).await?;

        if let Some(ref sessions) = auth_state.sessions {
            let session_id = header_value(&parts.headers, SESSION_ID_HEADER)
                .map(ToString::to_string)
                .or_else(|| identity.jti.clone());

            if let Some(session_id) = session_id {
                sessions
                    .touch(
                        &session_id,
                        &identity,
                        client_ip(&parts.headers).as_deref(),
                        header_value(&parts.headers, USER_AGENT.as_str()),
                    )
                    .await;
            }
        }

        Ok(Self(identity))
    }
}

/// Client address as reported by the proxy chain.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header_value(headers, "x-real-ip"))
        .map(ToString::to_string)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.9"));

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.5, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.5"));
    }

    #[test]
    fn test_client_ip_absent() {
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    mod extractor {
        use std::time::Duration;

        use axum::{
            Router,
            body::Body,
            http::{Request, StatusCode},
            routing::get,
        };
        use tower::ServiceExt;

        use super::super::*;
        use crate::storage::{InMemoryRevocationList, InMemorySessionStore};
        use crate::token::JwtService;

        async fn whoami(Authenticated(identity): Authenticated) -> String {
            format!("{}:{}", identity.subject_id, identity.role)
        }

        fn app(sessions: Arc<InMemorySessionStore>) -> Router {
            let verifier = CredentialVerifier::new(
                JwtService::new(b"extractor-secret-0123", 0),
                Arc::new(InMemoryRevocationList::new()),
            );
            let state = AuthState::new(Arc::new(verifier), Arc::new(RbacEngine::default()))
                .with_sessions(SessionTracker::new(sessions, Duration::from_secs(60), 5));
            Router::new().route("/me", get(whoami)).with_state(state)
        }

        #[tokio::test]
        async fn test_extractor_accepts_trusted_headers_and_touches_session() {
            let sessions = Arc::new(InMemorySessionStore::new());
            let response = app(sessions.clone())
                .oneshot(
                    Request::builder()
                        .uri("/me")
                        .header("x-user-id", "5")
                        .header("x-user-role", "PHARMACIST")
                        .header(SESSION_ID_HEADER, "sess-5")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(sessions.active_sessions(5), 1);
            assert!(sessions.get("sess-5").is_some());
        }

        #[tokio::test]
        async fn test_extractor_rejects_missing_credentials() {
            let response = app(Arc::new(InMemorySessionStore::new()))
                .oneshot(Request::builder().uri("/me").body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }
}
