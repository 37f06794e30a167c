//! Stream consumer that fans events out to in-app notifications.
//!
//! Each poll first reclaims entries left pending by a dead consumer, then
//! reads new ones. An entry is acknowledged once every recipient has been
//! attempted; failures for single recipients are logged and skipped.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::NotificationError;
use crate::store::NotificationStore;
use crate::stream::{EventStream, StreamEntry};
use crate::taxonomy;
use crate::types::{InAppNotification, InAppStatus, Recipient, StreamEvent};

/// Delay before retrying after a failed poll or group bootstrap.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Consumer group settings.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub group: String,
    pub consumer: String,
    pub batch_size: usize,
    /// How long a read waits for new entries.
    pub block: Duration,
    /// Pending entries idle this long are taken over.
    pub reclaim_idle: Duration,
    /// Where a newly created group starts (`0` or `$`).
    pub start_id: String,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            group: "notification_service".to_string(),
            consumer: "notifications-1".to_string(),
            batch_size: 10,
            block: Duration::from_millis(5000),
            reclaim_idle: Duration::from_millis(60_000),
            start_id: "0".to_string(),
        }
    }
}

/// Outcome of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Entries read, reclaimed ones included.
    pub entries: usize,
    pub reclaimed: usize,
    pub acknowledged: u64,
    pub created: usize,
    pub recipient_failures: usize,
}

pub struct EventConsumer {
    stream: Arc<dyn EventStream>,
    store: Arc<dyn NotificationStore>,
    settings: ConsumerSettings,
}

impl EventConsumer {
    #[must_use]
    pub fn new(
        stream: Arc<dyn EventStream>,
        store: Arc<dyn NotificationStore>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            stream,
            store,
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Creates the consumer group if it does not exist.
    pub async fn init(&self) -> Result<(), NotificationError> {
        self.stream
            .ensure_group(&self.settings.group, &self.settings.start_id)
            .await
    }

    /// Processes one batch: stale entries first, then new ones.
    pub async fn poll_once(&self) -> Result<BatchReport, NotificationError> {
        let s = &self.settings;

        let reclaimed = match self
            .stream
            .claim_stale(&s.group, &s.consumer, s.reclaim_idle, s.batch_size)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(group = %s.group, error = %e, "Failed to reclaim idle entries");
                Vec::new()
            }
        };

        // Do not block while reclaimed work is waiting.
        let block = if reclaimed.is_empty() { s.block } else { Duration::ZERO };
        let fresh = self
            .stream
            .read_group(&s.group, &s.consumer, s.batch_size, block)
            .await?;

        let mut report = BatchReport {
            reclaimed: reclaimed.len(),
            ..BatchReport::default()
        };

        for entry in reclaimed.into_iter().chain(fresh) {
            report.entries += 1;
            let event = decode_event(&entry);
            let (created, failed) = self.dispatch(&event).await;
            report.created += created;
            report.recipient_failures += failed;

            match self.stream.ack(&s.group, std::slice::from_ref(&entry.id)).await {
                Ok(n) => report.acknowledged += n,
                Err(e) => {
                    warn!(message_id = %entry.id, error = %e, "Failed to acknowledge entry");
                }
            }
        }

        if report.entries > 0 {
            debug!(
                entries = report.entries,
                reclaimed = report.reclaimed,
                created = report.created,
                "Processed stream batch"
            );
        }
        Ok(report)
    }

    /// Creates notifications for one event; returns `(created, failed)`.
    async fn dispatch(&self, event: &StreamEvent) -> (usize, usize) {
        let mut created = 0;
        let mut failed = 0;
        for notification in build_notifications(event) {
            match self.store.create(&notification).await {
                Ok(()) => created += 1,
                Err(e) => {
                    failed += 1;
                    warn!(
                        message_id = %event.message_id,
                        recipient_id = notification.recipient_id,
                        error = %e,
                        "Failed to create notification"
                    );
                }
            }
        }
        (created, failed)
    }

    /// Start the consumer loop in a background task.
    ///
    /// Returns a shutdown sender that can be used to stop it. Dropping the
    /// sender stops it too.
    #[must_use]
    pub fn start(self) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            info!(
                group = %self.settings.group,
                consumer = %self.settings.consumer,
                "Event consumer started"
            );

            let mut ready = false;
            loop {
                let step = async {
                    if !ready {
                        match self.init().await {
                            Ok(()) => ready = true,
                            Err(e) => {
                                error!(error = %e, "Failed to create consumer group");
                                tokio::time::sleep(ERROR_BACKOFF).await;
                                return;
                            }
                        }
                    }
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "Error reading event stream");
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                };

                tokio::select! {
                    _ = step => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Event consumer shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes a raw entry. Malformed JSON yields empty defaults.
#[must_use]
pub fn decode_event(entry: &StreamEntry) -> StreamEvent {
    let service = entry.field("service").unwrap_or_default().to_string();
    let event_type = entry.field("event_type").unwrap_or_default().to_string();

    let timestamp = entry
        .field("timestamp")
        .and_then(|t| OffsetDateTime::parse(t, &Rfc3339).ok());

    let recipients = entry
        .field("recipients")
        .map(|raw| decode_recipients(&entry.id, raw))
        .unwrap_or_default();

    let data = match entry.field("data").map(serde_json::from_str::<Value>) {
        Some(Ok(Value::Object(map))) => map,
        Some(Ok(_)) | None => Map::new(),
        Some(Err(e)) => {
            warn!(message_id = %entry.id, error = %e, "Malformed event data");
            Map::new()
        }
    };

    StreamEvent {
        message_id: entry.id.clone(),
        service,
        event_type,
        timestamp,
        recipients,
        data,
    }
}

fn decode_recipients(message_id: &str, raw: &str) -> Vec<Recipient> {
    let items = match serde_json::from_str::<Vec<Value>>(raw) {
        Ok(items) => items,
        Err(e) => {
            warn!(message_id, error = %e, "Malformed recipients");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Recipient>(item) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(message_id, error = %e, "Skipping unreadable recipient");
                None
            }
        })
        .collect()
}

/// In-app notifications for an event, one per recipient accepting in-app
/// delivery. Recipients fall back to the defaults derived from `data`.
#[must_use]
pub fn build_notifications(event: &StreamEvent) -> Vec<InAppNotification> {
    let recipients = if event.recipients.is_empty() {
        taxonomy::default_recipients(&event.service, &event.data)
    } else {
        event.recipients.clone()
    };

    let notification_type = taxonomy::notification_type(&event.service, &event.event_type);
    let is_urgent = taxonomy::is_urgent(&event.service, &event.event_type, &event.data);
    let (reference_type, reference_id) = taxonomy::reference(&event.service, &event.data);
    let title = taxonomy::title(&event.event_type, &event.data);
    let content = taxonomy::content(&event.service, &event.event_type, &event.data);
    let created_at = OffsetDateTime::now_utc();

    recipients
        .into_iter()
        .filter(Recipient::accepts_in_app)
        .map(|r| InAppNotification {
            id: Uuid::new_v4(),
            recipient_id: r.recipient_id,
            recipient_type: r.recipient_type,
            notification_type,
            title: title.clone(),
            content: content.clone(),
            status: InAppStatus::Unread,
            reference_id: reference_id.clone(),
            reference_type: reference_type.clone(),
            is_urgent,
            service: event.service.clone(),
            event_type: event.event_type.clone(),
            metadata: Value::Object(event.data.clone()),
            created_at,
            read_at: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use medsuite_auth::Role;
    use serde_json::json;

    use super::*;
    use crate::memory::InMemoryNotificationStore;
    use crate::publisher::EventPublisher;
    use crate::stream::MemoryEventStream;
    use crate::types::NotificationType;

    fn settings() -> ConsumerSettings {
        ConsumerSettings {
            block: Duration::ZERO,
            ..ConsumerSettings::default()
        }
    }

    fn raw_entry(fields: &[(&str, &str)]) -> StreamEntry {
        StreamEntry {
            id: "1-0".to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_empty_recipients_default_to_patient() {
        let event = decode_event(&raw_entry(&[
            ("service", "APPOINTMENTS"),
            ("event_type", "APPOINTMENT_CONFIRMED"),
            ("recipients", "[]"),
            ("data", r#"{"patient_id": 7, "appointment_id": 12}"#),
        ]));
        let notifications = build_notifications(&event);

        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].recipient_id, 7);
        assert_eq!(notifications[0].recipient_type, Role::Patient);
        assert_eq!(notifications[0].notification_type, NotificationType::Appointment);
        assert_eq!(notifications[0].reference_type.as_deref(), Some("appointment"));
        assert_eq!(notifications[0].reference_id.as_deref(), Some("12"));
    }

    #[test]
    fn test_abnormal_lab_marks_urgent() {
        let event = decode_event(&raw_entry(&[
            ("service", "LABORATORY"),
            ("event_type", "LAB_RESULT_READY"),
            ("data", r#"{"patient_id": 3, "is_abnormal": true}"#),
        ]));
        assert!(build_notifications(&event).iter().all(|n| n.is_urgent));
    }

    #[test]
    fn test_channel_filtering() {
        let recipients = r#"[
            {"recipient_id": 1, "recipient_type": "PATIENT", "channels": ["in_app", "email"]},
            {"recipient_id": 2, "recipient_type": "DOCTOR", "channels": ["sms"]},
            {"recipient_id": 3, "recipient_type": "NURSE"},
            {"recipient_id": "bad"}
        ]"#;
        let event = decode_event(&raw_entry(&[
            ("service", "USERS"),
            ("event_type", "PROFILE_UPDATED"),
            ("recipients", recipients),
        ]));
        assert_eq!(event.recipients.len(), 3);

        let ids: Vec<i64> = build_notifications(&event)
            .iter()
            .map(|n| n.recipient_id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_decode_tolerates_missing_fields() {
        let event = decode_event(&raw_entry(&[("data", "not json")]));
        assert!(event.service.is_empty());
        assert!(event.data.is_empty());
        assert!(event.timestamp.is_none());
        assert!(build_notifications(&event).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_recipients_still_acknowledged() {
        let stream = Arc::new(MemoryEventStream::new());
        let store = Arc::new(InMemoryNotificationStore::new());
        let consumer = EventConsumer::new(stream.clone(), store.clone(), settings());
        consumer.init().await.unwrap();

        let fields = vec![
            ("service".to_string(), "BILLING".to_string()),
            ("event_type".to_string(), "PAYMENT_DUE".to_string()),
            ("recipients".to_string(), "{not json".to_string()),
            ("data".to_string(), "{}".to_string()),
        ];
        stream.append(&fields, 100).await.unwrap();

        let report = consumer.poll_once().await.unwrap();
        assert_eq!(report.entries, 1);
        assert_eq!(report.acknowledged, 1);
        assert_eq!(report.created, 0);
        assert_eq!(stream.pending(&consumer.settings().group), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_publish_then_consume() {
        let stream = Arc::new(MemoryEventStream::new());
        let store = Arc::new(InMemoryNotificationStore::new());
        let publisher = EventPublisher::new(stream.clone());
        let consumer = EventConsumer::new(stream.clone(), store.clone(), settings());
        consumer.init().await.unwrap();

        for patient_id in [1, 2, 3] {
            publisher
                .publish(
                    "PHARMACY",
                    "PRESCRIPTION_READY",
                    &json!({"patient_id": patient_id, "prescription_id": 40 + patient_id}),
                    None,
                )
                .await
                .unwrap();
        }

        let report = consumer.poll_once().await.unwrap();
        assert_eq!(report.entries, 3);
        assert_eq!(report.created, 3);
        assert_eq!(report.acknowledged, 3);

        let again = consumer.poll_once().await.unwrap();
        assert_eq!(again, BatchReport::default());
        assert_eq!(store.unread_count(2).await.unwrap(), 1);
    }

    struct FailingStore;

    #[async_trait]
    impl NotificationStore for FailingStore {
        async fn create(&self, _: &InAppNotification) -> Result<(), NotificationError> {
            Err(NotificationError::Storage("disk full".into()))
        }
        async fn get(&self, _: Uuid) -> Result<Option<InAppNotification>, NotificationError> {
            Ok(None)
        }
        async fn list_for_recipient(
            &self,
            _: i64,
            _: bool,
            _: i64,
            _: i64,
        ) -> Result<Vec<InAppNotification>, NotificationError> {
            Ok(Vec::new())
        }
        async fn count_for_recipient(&self, _: i64, _: bool) -> Result<u64, NotificationError> {
            Ok(0)
        }
        async fn mark_read(&self, _: Uuid) -> Result<bool, NotificationError> {
            Ok(false)
        }
        async fn mark_all_read(&self, _: i64) -> Result<u64, NotificationError> {
            Ok(0)
        }
        async fn unread_count(&self, _: i64) -> Result<u64, NotificationError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_recipient_failures_do_not_block_ack() {
        let stream = Arc::new(MemoryEventStream::new());
        let consumer = EventConsumer::new(stream.clone(), Arc::new(FailingStore), settings());
        consumer.init().await.unwrap();

        EventPublisher::new(stream.clone())
            .publish(
                "APPOINTMENTS",
                "APPOINTMENT_CREATED",
                &json!({"patient_id": 1, "doctor_id": 2}),
                None,
            )
            .await
            .unwrap();

        let report = consumer.poll_once().await.unwrap();
        assert_eq!(report.recipient_failures, 2);
        assert_eq!(report.acknowledged, 1);
    }

    #[tokio::test]
    async fn test_unacked_entry_is_reprocessed_by_peer() {
        let stream = Arc::new(MemoryEventStream::new());
        let store = Arc::new(InMemoryNotificationStore::new());
        let group = ConsumerSettings::default().group;
        stream.ensure_group(&group, "0").await.unwrap();

        EventPublisher::new(stream.clone())
            .publish("USERS", "PASSWORD_CHANGED", &json!({"patient_id": 5}), None)
            .await
            .unwrap();
        // A consumer that read and died before acknowledging.
        let lost = stream.read_group(&group, "dead", 10, Duration::ZERO).await.unwrap();
        assert_eq!(lost.len(), 1);

        let peer = EventConsumer::new(
            stream.clone(),
            store.clone(),
            ConsumerSettings {
                consumer: "notifications-2".into(),
                reclaim_idle: Duration::ZERO,
                ..settings()
            },
        );
        let report = peer.poll_once().await.unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.created, 1);
        assert_eq!(stream.pending(&group), 0);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let stream = Arc::new(MemoryEventStream::new());
        let store = Arc::new(InMemoryNotificationStore::new());
        let shutdown = EventConsumer::new(stream.clone(), store.clone(), ConsumerSettings {
            block: Duration::from_millis(20),
            ..ConsumerSettings::default()
        })
        .start();

        EventPublisher::new(stream.clone())
            .publish("USERS", "WELCOME", &json!({"patient_id": 8}), None)
            .await
            .unwrap();

        for _ in 0..100 {
            if !store.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.len(), 1);
        shutdown.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_dropped_handle_stops_consumer() {
        let stream = Arc::new(MemoryEventStream::new());
        let store = Arc::new(InMemoryNotificationStore::new());
        let consumer = EventConsumer::new(
            stream.clone(),
            store.clone(),
            ConsumerSettings {
                block: Duration::from_millis(10),
                ..ConsumerSettings::default()
            },
        );

        drop(consumer.start());
        tokio::time::sleep(Duration::from_millis(50)).await;

        EventPublisher::new(stream.clone())
            .publish("USERS", "WELCOME", &json!({"patient_id": 8}), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.is_empty());
    }
}
