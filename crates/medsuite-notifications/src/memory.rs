//! In-memory stores for tests and single-process deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::NotificationError;
use crate::store::{NotificationStore, ScheduleStore};
use crate::types::{InAppNotification, InAppStatus, ScheduleEntry, ScheduleKey, ScheduleStatus};

#[derive(Debug, Default)]
pub struct InMemoryNotificationStore {
    notifications: DashMap<Uuid, InAppNotification>,
}

impl InMemoryNotificationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    /// Snapshot of everything stored, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<InAppNotification> {
        let mut all: Vec<_> = self.notifications.iter().map(|n| n.value().clone()).collect();
        all.sort_by_key(|n| n.created_at);
        all
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn create(&self, notification: &InAppNotification) -> Result<(), NotificationError> {
        self.notifications
            .insert(notification.id, notification.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<InAppNotification>, NotificationError> {
        Ok(self.notifications.get(&id).map(|n| n.value().clone()))
    }

    async fn list_for_recipient(
        &self,
        recipient_id: i64,
        unread_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InAppNotification>, NotificationError> {
        let mut matching: Vec<InAppNotification> = self
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .filter(|n| !unread_only || n.status == InAppStatus::Unread)
            .map(|n| n.value().clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_for_recipient(
        &self,
        recipient_id: i64,
        unread_only: bool,
    ) -> Result<u64, NotificationError> {
        Ok(self
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .filter(|n| !unread_only || n.status == InAppStatus::Unread)
            .count() as u64)
    }

    async fn mark_read(&self, id: Uuid) -> Result<bool, NotificationError> {
        match self.notifications.get_mut(&id) {
            Some(mut n) => {
                if n.status == InAppStatus::Unread {
                    n.status = InAppStatus::Read;
                    n.read_at = Some(OffsetDateTime::now_utc());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_read(&self, recipient_id: i64) -> Result<u64, NotificationError> {
        let now = OffsetDateTime::now_utc();
        let mut changed = 0;
        for mut n in self.notifications.iter_mut() {
            if n.recipient_id == recipient_id && n.status == InAppStatus::Unread {
                n.status = InAppStatus::Read;
                n.read_at = Some(now);
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn unread_count(&self, recipient_id: i64) -> Result<u64, NotificationError> {
        Ok(self
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id && n.status == InAppStatus::Unread)
            .count() as u64)
    }
}

/// Schedule store guarded by one lock so check-and-insert is atomic.
#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    entries: Mutex<Vec<ScheduleEntry>>,
}

impl InMemoryScheduleStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn all(&self) -> Vec<ScheduleEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<ScheduleEntry>>, NotificationError> {
        self.entries
            .lock()
            .map_err(|_| NotificationError::Internal("schedule store poisoned".into()))
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn exists_scheduled(&self, key: &ScheduleKey) -> Result<bool, NotificationError> {
        Ok(self
            .lock()?
            .iter()
            .any(|e| e.status == ScheduleStatus::Scheduled && &e.key() == key))
    }

    async fn insert_if_absent(&self, entry: &ScheduleEntry) -> Result<bool, NotificationError> {
        let mut entries = self.lock()?;
        let key = entry.key();
        let duplicate = entries.iter().any(|e| {
            e.status == ScheduleStatus::Scheduled && e.channel == entry.channel && e.key() == key
        });
        if duplicate && entry.status == ScheduleStatus::Scheduled {
            return Ok(false);
        }
        entries.push(entry.clone());
        Ok(true)
    }

    async fn list_for_recipient(
        &self,
        recipient_id: i64,
    ) -> Result<Vec<ScheduleEntry>, NotificationError> {
        let mut matching: Vec<ScheduleEntry> = self
            .lock()?
            .iter()
            .filter(|e| e.recipient_id == recipient_id)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.scheduled_at);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use medsuite_auth::Role;

    use super::*;
    use crate::types::{DeliveryChannel, NotificationType};

    fn notification(recipient_id: i64) -> InAppNotification {
        InAppNotification {
            id: Uuid::new_v4(),
            recipient_id,
            recipient_type: Role::Patient,
            notification_type: NotificationType::System,
            title: "t".into(),
            content: "c".into(),
            status: InAppStatus::Unread,
            reference_id: None,
            reference_type: None,
            is_urgent: false,
            service: "USERS".into(),
            event_type: "USER_CREATED".into(),
            metadata: serde_json::Value::Null,
            created_at: OffsetDateTime::now_utc(),
            read_at: None,
        }
    }

    fn entry(channel: DeliveryChannel) -> ScheduleEntry {
        ScheduleEntry {
            id: Uuid::new_v4(),
            recipient_id: 1,
            recipient_type: Role::Patient,
            recipient_email: Some("p@example.com".into()),
            recipient_phone: None,
            notification_type: NotificationType::AppointmentReminder,
            channel,
            subject: "s".into(),
            content: "c".into(),
            scheduled_at: OffsetDateTime::now_utc(),
            status: ScheduleStatus::Scheduled,
            template_ref: "appointment_reminder".into(),
            reference_id: "5".into(),
            reference_type: "appointment".into(),
        }
    }

    #[tokio::test]
    async fn test_mark_read_and_counts() {
        let store = InMemoryNotificationStore::new();
        let a = notification(1);
        store.create(&a).await.unwrap();
        store.create(&notification(1)).await.unwrap();
        store.create(&notification(2)).await.unwrap();

        assert_eq!(store.unread_count(1).await.unwrap(), 2);
        assert!(store.mark_read(a.id).await.unwrap());
        assert!(!store.mark_read(Uuid::new_v4()).await.unwrap());
        assert_eq!(store.unread_count(1).await.unwrap(), 1);
        assert!(store.get(a.id).await.unwrap().unwrap().read_at.is_some());

        assert_eq!(store.mark_all_read(1).await.unwrap(), 1);
        assert_eq!(store.unread_count(1).await.unwrap(), 0);
        assert_eq!(store.unread_count(2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_paging() {
        let store = InMemoryNotificationStore::new();
        for _ in 0..5 {
            store.create(&notification(3)).await.unwrap();
        }
        assert_eq!(store.list_for_recipient(3, false, 2, 0).await.unwrap().len(), 2);
        assert_eq!(store.list_for_recipient(3, false, 10, 4).await.unwrap().len(), 1);
        let unread = store.list_for_recipient(3, true, 10, 0).await.unwrap();
        assert!(unread.iter().all(|n| n.status == InAppStatus::Unread));
    }

    #[tokio::test]
    async fn test_count_ignores_paging() {
        let store = InMemoryNotificationStore::new();
        let mut first = None;
        for _ in 0..5 {
            let n = notification(3);
            store.create(&n).await.unwrap();
            first.get_or_insert(n.id);
        }
        store.create(&notification(4)).await.unwrap();
        store.mark_read(first.unwrap()).await.unwrap();

        assert_eq!(store.list_for_recipient(3, false, 2, 0).await.unwrap().len(), 2);
        assert_eq!(store.count_for_recipient(3, false).await.unwrap(), 5);
        assert_eq!(store.count_for_recipient(3, true).await.unwrap(), 4);
        assert_eq!(store.count_for_recipient(9, false).await.unwrap(), 0);
    }

    #[test]
    fn test_insert_if_absent_per_channel() {
        let store = InMemoryScheduleStore::new();
        tokio_test::block_on(async {
            assert!(store.insert_if_absent(&entry(DeliveryChannel::Email)).await.unwrap());
            assert!(!store.insert_if_absent(&entry(DeliveryChannel::Email)).await.unwrap());
            assert!(store.insert_if_absent(&entry(DeliveryChannel::Sms)).await.unwrap());
            assert!(store.exists_scheduled(&entry(DeliveryChannel::Sms).key()).await.unwrap());
            assert_eq!(store.list_for_recipient(1).await.unwrap().len(), 2);
        });
        assert_eq!(store.all().len(), 2);
    }
}
