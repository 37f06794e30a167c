//! Arc-owning adapters implementing the notification storage traits.
//!
//! These wrap the lifetime-based storage types and own an `Arc<PgPool>`, so
//! they can be shared as `Arc<dyn NotificationStore>` / `Arc<dyn ScheduleStore>`.

use std::sync::Arc;

use async_trait::async_trait;
use medsuite_notifications::{
    InAppNotification, NotificationError, NotificationStore, ScheduleEntry, ScheduleKey,
    ScheduleStore,
};
use uuid::Uuid;

use crate::PgPool;
use crate::notification::NotificationStorage;
use crate::schedule::ScheduleStorage;

// =============================================================================
// In-app notifications
// =============================================================================

#[derive(Clone)]
pub struct PgNotificationStore {
    pool: Arc<PgPool>,
}

impl PgNotificationStore {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    fn storage(&self) -> NotificationStorage<'_> {
        NotificationStorage::new(&self.pool)
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn create(&self, notification: &InAppNotification) -> Result<(), NotificationError> {
        Ok(self.storage().create(notification).await?)
    }

    async fn get(&self, id: Uuid) -> Result<Option<InAppNotification>, NotificationError> {
        Ok(self.storage().find_by_id(id).await?)
    }

    async fn list_for_recipient(
        &self,
        recipient_id: i64,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InAppNotification>, NotificationError> {
        Ok(self
            .storage()
            .list_for_recipient(recipient_id, unread_only, limit, offset)
            .await?)
    }

    async fn count_for_recipient(
        &self,
        recipient_id: i64,
        unread_only: bool,
    ) -> Result<u64, NotificationError> {
        Ok(self
            .storage()
            .count_for_recipient(recipient_id, unread_only)
            .await?)
    }

    async fn mark_read(&self, id: Uuid) -> Result<bool, NotificationError> {
        Ok(self.storage().mark_read(id).await?)
    }

    async fn mark_all_read(&self, recipient_id: i64) -> Result<u64, NotificationError> {
        Ok(self.storage().mark_all_read(recipient_id).await?)
    }

    async fn unread_count(&self, recipient_id: i64) -> Result<u64, NotificationError> {
        Ok(self.storage().unread_count(recipient_id).await?)
    }
}

// =============================================================================
// Schedule entries
// =============================================================================

#[derive(Clone)]
pub struct PgScheduleStore {
    pool: Arc<PgPool>,
}

impl PgScheduleStore {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    fn storage(&self) -> ScheduleStorage<'_> {
        ScheduleStorage::new(&self.pool)
    }
}

#[async_trait]
impl ScheduleStore for PgScheduleStore {
    async fn exists_scheduled(&self, key: &ScheduleKey) -> Result<bool, NotificationError> {
        Ok(self.storage().exists_scheduled(key).await?)
    }

    async fn insert_if_absent(&self, entry: &ScheduleEntry) -> Result<bool, NotificationError> {
        Ok(self.storage().insert_if_absent(entry).await?)
    }

    async fn list_for_recipient(
        &self,
        recipient_id: i64,
    ) -> Result<Vec<ScheduleEntry>, NotificationError> {
        Ok(self.storage().list_for_recipient(recipient_id).await?)
    }
}
