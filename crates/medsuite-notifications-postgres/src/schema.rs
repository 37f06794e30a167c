//! Table bootstrap.

use sqlx_core::query::query;
use tracing::debug;

use crate::{PgPool, StorageResult};

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS in_app_notification (
        id                UUID PRIMARY KEY,
        recipient_id      BIGINT NOT NULL,
        recipient_type    TEXT NOT NULL,
        notification_type TEXT NOT NULL,
        title             TEXT NOT NULL,
        content           TEXT NOT NULL,
        status            TEXT NOT NULL DEFAULT 'UNREAD',
        reference_id      TEXT,
        reference_type    TEXT,
        is_urgent         BOOLEAN NOT NULL DEFAULT FALSE,
        service           TEXT NOT NULL,
        event_type        TEXT NOT NULL,
        metadata          JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        read_at           TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS in_app_notification_recipient_idx
        ON in_app_notification (recipient_id, status, created_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS notification_schedule (
        id                UUID PRIMARY KEY,
        recipient_id      BIGINT NOT NULL,
        recipient_type    TEXT NOT NULL,
        recipient_email   TEXT,
        recipient_phone   TEXT,
        notification_type TEXT NOT NULL,
        channel           TEXT NOT NULL,
        subject           TEXT NOT NULL,
        content           TEXT NOT NULL,
        scheduled_at      TIMESTAMPTZ NOT NULL,
        status            TEXT NOT NULL DEFAULT 'SCHEDULED',
        template_ref      TEXT NOT NULL,
        reference_id      TEXT NOT NULL,
        reference_type    TEXT NOT NULL,
        created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS notification_schedule_pending_key
        ON notification_schedule
            (recipient_id, notification_type, reference_type, reference_id, channel)
        WHERE status = 'SCHEDULED'
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS notification_schedule_due_idx
        ON notification_schedule (status, scheduled_at)
    "#,
];

/// Creates the notification tables and indexes if they do not exist.
///
/// # Errors
///
/// Returns an error if a statement fails.
pub async fn ensure_schema(pool: &PgPool) -> StorageResult<()> {
    for statement in STATEMENTS {
        query(statement).execute(pool).await?;
    }
    debug!("Notification schema ready");
    Ok(())
}
