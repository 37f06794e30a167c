use async_trait::async_trait;
use uuid::Uuid;

use crate::error::NotificationError;
use crate::types::{InAppNotification, ScheduleEntry, ScheduleKey};

/// Storage trait for in-app notifications
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Persist a new notification
    async fn create(&self, notification: &InAppNotification) -> Result<(), NotificationError>;

    /// Get a notification by ID
    async fn get(&self, id: Uuid) -> Result<Option<InAppNotification>, NotificationError>;

    /// Notifications for a recipient, newest first
    async fn list_for_recipient(
        &self,
        recipient_id: i64,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InAppNotification>, NotificationError>;

    /// Total matching `list_for_recipient`, ignoring paging
    async fn count_for_recipient(
        &self,
        recipient_id: i64,
        unread_only: bool,
    ) -> Result<u64, NotificationError>;

    /// Mark one notification read. Returns `false` when it does not exist.
    async fn mark_read(&self, id: Uuid) -> Result<bool, NotificationError>;

    /// Mark every unread notification of a recipient read; returns how many changed.
    async fn mark_all_read(&self, recipient_id: i64) -> Result<u64, NotificationError>;

    async fn unread_count(&self, recipient_id: i64) -> Result<u64, NotificationError>;
}

/// Storage trait for pending outbound notifications
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Whether a SCHEDULED entry exists for the key on any channel
    async fn exists_scheduled(&self, key: &ScheduleKey) -> Result<bool, NotificationError>;

    /// Insert unless a SCHEDULED entry with the same key and channel exists.
    ///
    /// Must be atomic: concurrent callers inserting the same key and channel
    /// produce exactly one entry. Returns `true` when inserted.
    async fn insert_if_absent(&self, entry: &ScheduleEntry) -> Result<bool, NotificationError>;

    /// Entries for a recipient, oldest first
    async fn list_for_recipient(
        &self,
        recipient_id: i64,
    ) -> Result<Vec<ScheduleEntry>, NotificationError>;
}
