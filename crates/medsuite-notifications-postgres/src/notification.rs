//! In-app notification storage.

use std::str::FromStr;

use medsuite_auth::Role;
use medsuite_notifications::{InAppNotification, InAppStatus, NotificationType};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PgPool, StorageError, StorageResult};

// =============================================================================
// Row Mapping
// =============================================================================

type NotificationTuple = (
    Uuid,
    i64,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    bool,
    String,
    String,
    serde_json::Value,
    OffsetDateTime,
    Option<OffsetDateTime>,
);

const COLUMNS: &str = "id, recipient_id, recipient_type, notification_type, title, content, \
    status, reference_id, reference_type, is_urgent, service, event_type, metadata, \
    created_at, read_at";

fn from_tuple(row: NotificationTuple) -> StorageResult<InAppNotification> {
    Ok(InAppNotification {
        id: row.0,
        recipient_id: row.1,
        recipient_type: Role::from_str(&row.2)
            .map_err(|_| StorageError::decode(format!("recipient_type '{}'", row.2)))?,
        notification_type: NotificationType::from_str(&row.3)
            .map_err(|_| StorageError::decode(format!("notification_type '{}'", row.3)))?,
        title: row.4,
        content: row.5,
        status: InAppStatus::from_str(&row.6)
            .map_err(|_| StorageError::decode(format!("status '{}'", row.6)))?,
        reference_id: row.7,
        reference_type: row.8,
        is_urgent: row.9,
        service: row.10,
        event_type: row.11,
        metadata: row.12,
        created_at: row.13,
        read_at: row.14,
    })
}

// =============================================================================
// Notification Storage
// =============================================================================

/// Operations on the `in_app_notification` table.
pub struct NotificationStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> NotificationStorage<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert a notification. Re-inserting the same id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the database insert fails.
    pub async fn create(&self, n: &InAppNotification) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO in_app_notification (
                id, recipient_id, recipient_type, notification_type, title, content,
                status, reference_id, reference_type, is_urgent, service, event_type,
                metadata, created_at, read_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(n.id)
        .bind(n.recipient_id)
        .bind(n.recipient_type.as_str())
        .bind(n.notification_type.as_str())
        .bind(&n.title)
        .bind(&n.content)
        .bind(n.status.as_str())
        .bind(&n.reference_id)
        .bind(&n.reference_type)
        .bind(n.is_urgent)
        .bind(&n.service)
        .bind(&n.event_type)
        .bind(&n.metadata)
        .bind(n.created_at)
        .bind(n.read_at)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the query fails or the row cannot be decoded.
    pub async fn find_by_id(&self, id: Uuid) -> StorageResult<Option<InAppNotification>> {
        let sql = format!("SELECT {COLUMNS} FROM in_app_notification WHERE id = $1");
        let row: Option<NotificationTuple> = query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        row.map(from_tuple).transpose()
    }

    /// Newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn list_for_recipient(
        &self,
        recipient_id: i64,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> StorageResult<Vec<InAppNotification>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM in_app_notification \
             WHERE recipient_id = $1 AND ($2 = FALSE OR status = 'UNREAD') \
             ORDER BY created_at DESC, id \
             LIMIT $3 OFFSET $4"
        );
        let rows: Vec<NotificationTuple> = query_as(&sql)
            .bind(recipient_id)
            .bind(unread_only)
            .bind(limit.max(0))
            .bind(offset.max(0))
            .fetch_all(self.pool)
            .await?;

        rows.into_iter().map(from_tuple).collect()
    }

    /// Returns `false` when no notification has the id.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_read(&self, id: Uuid) -> StorageResult<bool> {
        let exists: bool = query_scalar(
            r#"
            WITH updated AS (
                UPDATE in_app_notification
                SET status = 'READ', read_at = COALESCE(read_at, NOW())
                WHERE id = $1
                RETURNING 1
            )
            SELECT EXISTS(SELECT 1 FROM updated)
            "#,
        )
        .bind(id)
        .fetch_one(self.pool)
        .await?;

        Ok(exists)
    }

    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_all_read(&self, recipient_id: i64) -> StorageResult<u64> {
        let result = query(
            r#"
            UPDATE in_app_notification
            SET status = 'READ', read_at = NOW()
            WHERE recipient_id = $1 AND status = 'UNREAD'
            "#,
        )
        .bind(recipient_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_for_recipient(
        &self,
        recipient_id: i64,
        unread_only: bool,
    ) -> StorageResult<u64> {
        let count: i64 = query_scalar(
            r#"
            SELECT COUNT(*) FROM in_app_notification
            WHERE recipient_id = $1 AND ($2 = FALSE OR status = 'UNREAD')
            "#,
        )
        .bind(recipient_id)
        .bind(unread_only)
        .fetch_one(self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn unread_count(&self, recipient_id: i64) -> StorageResult<u64> {
        let count: i64 = query_scalar(
            r#"
            SELECT COUNT(*) FROM in_app_notification
            WHERE recipient_id = $1 AND status = 'UNREAD'
            "#,
        )
        .bind(recipient_id)
        .fetch_one(self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(role: &str) -> NotificationTuple {
        (
            Uuid::new_v4(),
            4,
            role.to_string(),
            "LAB_RESULT".to_string(),
            "Lab result ready".to_string(),
            "body".to_string(),
            "UNREAD".to_string(),
            Some("9".to_string()),
            Some("lab_test".to_string()),
            true,
            "LABORATORY".to_string(),
            "LAB_RESULT_READY".to_string(),
            serde_json::json!({"is_abnormal": true}),
            OffsetDateTime::now_utc(),
            None,
        )
    }

    #[test]
    fn test_from_tuple() {
        let n = from_tuple(tuple("LAB_TECHNICIAN")).unwrap();
        assert_eq!(n.recipient_type, Role::LabTechnician);
        assert_eq!(n.notification_type, NotificationType::LabResult);
        assert_eq!(n.status, InAppStatus::Unread);
        assert!(n.is_urgent);
    }

    #[test]
    fn test_from_tuple_rejects_unknown_role() {
        let err = from_tuple(tuple("JANITOR")).unwrap_err();
        assert!(matches!(err, StorageError::Decode(_)));
    }
}
