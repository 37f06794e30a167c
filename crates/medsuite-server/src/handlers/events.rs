use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use medsuite_auth::middleware::Authenticated;
use medsuite_auth::{Action, ResourceKind};
use medsuite_notifications::Recipient;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub service: String,
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub recipients: Option<Vec<Recipient>>,
}

/// `POST /api/events/`: appends an event on behalf of a service that does
/// not publish itself. ADMIN only.
///
/// 201 with the stream id, or 202 with a null id when the stream is down.
pub async fn publish(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    payload: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    state
        .auth
        .rbac
        .enforce(Some(&identity), ResourceKind::Event, Action::Create, None)?;

    let Json(request) = payload.map_err(|e| ApiError::malformed(e.body_text()))?;
    let service = request.service.trim().to_ascii_uppercase();
    let event_type = request.event_type.trim().to_ascii_uppercase();
    if service.is_empty() || event_type.is_empty() {
        return Err(ApiError::malformed("service and event_type are required"));
    }
    let data = match request.data {
        Value::Null => json!({}),
        obj @ Value::Object(_) => obj,
        _ => return Err(ApiError::malformed("data must be an object")),
    };

    let message_id = state
        .publisher
        .publish(&service, &event_type, &data, request.recipients.as_deref())
        .await;

    let status = if message_id.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(json!({ "message_id": message_id }))))
}
