//! Error responses for authentication failures.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::AuthError;

// =============================================================================
// IntoResponse Implementation
// =============================================================================

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_code(&self);

        if self.is_server_error() {
            tracing::error!(error = %self, "Authentication backend failure");
        }

        let message = match &self {
            // Don't leak backend details.
            AuthError::Storage { .. }
            | AuthError::Configuration { .. }
            | AuthError::Internal { .. } => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let mut headers = HeaderMap::new();
        if status == StatusCode::UNAUTHORIZED {
            let www_auth = build_www_authenticate_header(self.code(), &message);
            if let Ok(value) = HeaderValue::from_str(&www_auth) {
                headers.insert(header::WWW_AUTHENTICATE, value);
            }
        }

        let body = json!({
            "error": self.code(),
            "detail": message,
        });

        (status, headers, Json(body)).into_response()
    }
}

/// HTTP status for an auth error.
#[must_use]
pub fn status_code(error: &AuthError) -> StatusCode {
    match error {
        AuthError::Malformed { .. } => StatusCode::BAD_REQUEST,
        AuthError::Expired
        | AuthError::Invalid { .. }
        | AuthError::Revoked
        | AuthError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
        AuthError::Forbidden { .. } => StatusCode::FORBIDDEN,
        AuthError::Storage { .. }
        | AuthError::Configuration { .. }
        | AuthError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Format: `Bearer realm="medsuite", error="invalid_token", error_description="..."`
fn build_www_authenticate_header(error: &str, description: &str) -> String {
    let escaped_desc = description.replace('\"', "\\\"");
    format!("Bearer realm=\"medsuite\", error=\"{error}\", error_description=\"{escaped_desc}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            status_code(&AuthError::malformed("x")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_code(&AuthError::Expired), StatusCode::UNAUTHORIZED);
        assert_eq!(status_code(&AuthError::Revoked), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_code(&AuthError::invalid("x")),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_code(&AuthError::forbidden("x")),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_code(&AuthError::storage("x")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unauthorized_has_www_authenticate() {
        let response = AuthError::Expired.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let header = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(header.contains("error=\"token_expired\""));
    }

    #[test]
    fn test_forbidden_has_no_www_authenticate() {
        let response = AuthError::forbidden("nope").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[test]
    fn test_escape_quotes() {
        let header = build_www_authenticate_header("invalid_token", "bad \"token\"");
        assert!(header.contains("bad \\\"token\\\""));
    }
}
