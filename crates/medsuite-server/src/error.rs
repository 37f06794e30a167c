use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use medsuite_auth::AuthError;
use medsuite_notifications::NotificationError;
use serde_json::json;

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Malformed(String),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, detail) = match self {
            Self::Auth(err) => return err.into_response(),
            Self::NotFound(msg) | Self::Notification(NotificationError::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "not_found", msg)
            }
            Self::Malformed(msg) => (StatusCode::BAD_REQUEST, "malformed_request", msg),
            other => {
                tracing::error!(error = %other, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": code, "detail": detail }))).into_response()
    }
}
