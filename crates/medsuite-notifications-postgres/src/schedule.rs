//! Notification schedule storage.
//!
//! At most one SCHEDULED row exists per `(recipient_id, notification_type,
//! reference_type, reference_id, channel)`; the partial unique index makes
//! [`ScheduleStorage::insert_if_absent`] race-free across processes.

use std::str::FromStr;

use medsuite_auth::Role;
use medsuite_notifications::{
    DeliveryChannel, NotificationType, ScheduleEntry, ScheduleKey, ScheduleStatus,
};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PgPool, StorageError, StorageResult};

type ScheduleTuple = (
    Uuid,
    i64,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
    String,
    OffsetDateTime,
    String,
    String,
    String,
    String,
);

fn from_tuple(row: ScheduleTuple) -> StorageResult<ScheduleEntry> {
    Ok(ScheduleEntry {
        id: row.0,
        recipient_id: row.1,
        recipient_type: Role::from_str(&row.2)
            .map_err(|_| StorageError::decode(format!("recipient_type '{}'", row.2)))?,
        recipient_email: row.3,
        recipient_phone: row.4,
        notification_type: NotificationType::from_str(&row.5)
            .map_err(|_| StorageError::decode(format!("notification_type '{}'", row.5)))?,
        channel: DeliveryChannel::from_str(&row.6)
            .map_err(|_| StorageError::decode(format!("channel '{}'", row.6)))?,
        subject: row.7,
        content: row.8,
        scheduled_at: row.9,
        status: ScheduleStatus::from_str(&row.10)
            .map_err(|_| StorageError::decode(format!("status '{}'", row.10)))?,
        template_ref: row.11,
        reference_id: row.12,
        reference_type: row.13,
    })
}

/// Operations on the `notification_schedule` table.
pub struct ScheduleStorage<'a> {
    pool: &'a PgPool,
}

impl<'a> ScheduleStorage<'a> {
    #[must_use]
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Whether a SCHEDULED row exists for the key on any channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn exists_scheduled(&self, key: &ScheduleKey) -> StorageResult<bool> {
        let exists: bool = query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM notification_schedule
                WHERE recipient_id = $1
                  AND notification_type = $2
                  AND reference_type = $3
                  AND reference_id = $4
                  AND status = 'SCHEDULED'
            )
            "#,
        )
        .bind(key.recipient_id)
        .bind(key.notification_type.as_str())
        .bind(&key.reference_type)
        .bind(&key.reference_id)
        .fetch_one(self.pool)
        .await?;

        Ok(exists)
    }

    /// Inserts the entry unless a SCHEDULED row already holds its key and
    /// channel. Returns `true` when a row was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_if_absent(&self, entry: &ScheduleEntry) -> StorageResult<bool> {
        let result = query(
            r#"
            INSERT INTO notification_schedule (
                id, recipient_id, recipient_type, recipient_email, recipient_phone,
                notification_type, channel, subject, content, scheduled_at, status,
                template_ref, reference_id, reference_type
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (recipient_id, notification_type, reference_type, reference_id, channel)
                WHERE status = 'SCHEDULED'
                DO NOTHING
            "#,
        )
        .bind(entry.id)
        .bind(entry.recipient_id)
        .bind(entry.recipient_type.as_str())
        .bind(&entry.recipient_email)
        .bind(&entry.recipient_phone)
        .bind(entry.notification_type.as_str())
        .bind(entry.channel.as_str())
        .bind(&entry.subject)
        .bind(&entry.content)
        .bind(entry.scheduled_at)
        .bind(entry.status.as_str())
        .bind(&entry.template_ref)
        .bind(&entry.reference_id)
        .bind(&entry.reference_type)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be decoded.
    pub async fn list_for_recipient(&self, recipient_id: i64) -> StorageResult<Vec<ScheduleEntry>> {
        let rows: Vec<ScheduleTuple> = query_as(
            r#"
            SELECT id, recipient_id, recipient_type, recipient_email, recipient_phone,
                   notification_type, channel, subject, content, scheduled_at, status,
                   template_ref, reference_id, reference_type
            FROM notification_schedule
            WHERE recipient_id = $1
            ORDER BY scheduled_at, channel
            "#,
        )
        .bind(recipient_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(from_tuple).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tuple() {
        let entry = from_tuple((
            Uuid::new_v4(),
            2,
            "PATIENT".into(),
            Some("p@example.com".into()),
            None,
            "PAYMENT_DUE".into(),
            "EMAIL".into(),
            "Payment due".into(),
            "body".into(),
            OffsetDateTime::now_utc(),
            "SCHEDULED".into(),
            "payment_due_reminder".into(),
            "90".into(),
            "invoice".into(),
        ))
        .unwrap();

        assert_eq!(entry.channel, DeliveryChannel::Email);
        assert_eq!(entry.status, ScheduleStatus::Scheduled);
        assert_eq!(entry.key().reference_type, "invoice");
    }
}
