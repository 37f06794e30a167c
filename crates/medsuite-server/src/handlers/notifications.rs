//! In-app notification endpoints.
//!
//! Callers see their own notifications; ADMIN may name any recipient. The
//! RBAC table decides, with `recipient_id` as the owner field.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use medsuite_auth::middleware::Authenticated;
use medsuite_auth::{Action, Identity, ResourceKind};
use medsuite_notifications::InAppNotification;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::ApiError;
use crate::server::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub recipient_id: Option<i64>,
    #[serde(default)]
    pub unread: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn authorize_recipient(
    state: &AppState,
    identity: &Identity,
    action: Action,
    recipient_id: i64,
) -> Result<(), ApiError> {
    state.auth.rbac.enforce(
        Some(identity),
        ResourceKind::Notification,
        action,
        Some(&json!({ "recipient_id": recipient_id })),
    )?;
    Ok(())
}

/// `GET /api/notifications/`
pub async fn list(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let recipient_id = query.recipient_id.unwrap_or(identity.subject_id);
    authorize_recipient(&state, &identity, Action::List, recipient_id)?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let results = state
        .notifications
        .list_for_recipient(recipient_id, query.unread, limit, offset)
        .await?;
    let count = state
        .notifications
        .count_for_recipient(recipient_id, query.unread)
        .await?;

    Ok(Json(json!({
        "count": count,
        "limit": limit,
        "offset": offset,
        "results": results,
    })))
}

/// `GET /api/notifications/unread-count/`
pub async fn unread_count(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
) -> Result<Json<Value>, ApiError> {
    let count = state
        .notifications
        .unread_count(identity.subject_id)
        .await?;
    Ok(Json(json!({ "unread_count": count })))
}

/// `POST /api/notifications/{id}/read/`
pub async fn mark_read(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    Path(id): Path<Uuid>,
) -> Result<Json<InAppNotification>, ApiError> {
    let notification = state
        .notifications
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("notification {id} not found")))?;
    authorize_recipient(&state, &identity, Action::Update, notification.recipient_id)?;

    if !state.notifications.mark_read(id).await? {
        return Err(ApiError::not_found(format!("notification {id} not found")));
    }

    let updated = state
        .notifications
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("notification {id} not found")))?;
    Ok(Json(updated))
}

/// `POST /api/notifications/read-all/`
pub async fn mark_all_read(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
) -> Result<Json<Value>, ApiError> {
    let updated = state
        .notifications
        .mark_all_read(identity.subject_id)
        .await?;
    tracing::debug!(recipient_id = identity.subject_id, updated, "Marked all read");
    Ok(Json(json!({ "updated": updated })))
}
