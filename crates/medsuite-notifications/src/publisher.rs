//! Best-effort event publishing.

use std::sync::Arc;

use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::error::NotificationError;
use crate::stream::{DEFAULT_MAX_LEN, EventStream};
use crate::types::Recipient;

/// Appends domain events to the shared stream.
///
/// Publishing never fails the caller: transport errors are logged and
/// reported as an absent message id.
#[derive(Clone)]
pub struct EventPublisher {
    stream: Arc<dyn EventStream>,
    max_len: usize,
}

impl EventPublisher {
    #[must_use]
    pub fn new(stream: Arc<dyn EventStream>) -> Self {
        Self {
            stream,
            max_len: DEFAULT_MAX_LEN,
        }
    }

    #[must_use]
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(1);
        self
    }

    /// Publishes an event; returns the stream id or `None` on failure.
    pub async fn publish(
        &self,
        service: &str,
        event_type: &str,
        data: &Value,
        recipients: Option<&[Recipient]>,
    ) -> Option<String> {
        match self.try_publish(service, event_type, data, recipients).await {
            Ok(id) => {
                debug!(service, event_type, message_id = %id, "Published event");
                Some(id)
            }
            Err(e) => {
                warn!(service, event_type, error = %e, "Failed to publish event");
                None
            }
        }
    }

    /// Like [`publish`](Self::publish) but surfaces the error.
    pub async fn try_publish(
        &self,
        service: &str,
        event_type: &str,
        data: &Value,
        recipients: Option<&[Recipient]>,
    ) -> Result<String, NotificationError> {
        let fields = encode_fields(service, event_type, data, recipients.unwrap_or(&[]))?;
        self.stream.append(&fields, self.max_len).await
    }
}

fn encode_fields(
    service: &str,
    event_type: &str,
    data: &Value,
    recipients: &[Recipient],
) -> Result<Vec<(String, String)>, NotificationError> {
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| NotificationError::Serialization(e.to_string()))?;

    Ok(vec![
        ("service".to_string(), service.to_string()),
        ("event_type".to_string(), event_type.to_string()),
        ("timestamp".to_string(), timestamp),
        ("recipients".to_string(), serde_json::to_string(recipients)?),
        ("data".to_string(), serde_json::to_string(data)?),
    ])
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use medsuite_auth::Role;
    use serde_json::json;

    use super::*;
    use crate::stream::{MemoryEventStream, StreamEntry};

    struct BrokenStream;

    #[async_trait]
    impl EventStream for BrokenStream {
        async fn append(
            &self,
            _: &[(String, String)],
            _: usize,
        ) -> Result<String, NotificationError> {
            Err(NotificationError::Stream("connection refused".into()))
        }
        async fn ensure_group(&self, _: &str, _: &str) -> Result<(), NotificationError> {
            Ok(())
        }
        async fn read_group(
            &self,
            _: &str,
            _: &str,
            _: usize,
            _: Duration,
        ) -> Result<Vec<StreamEntry>, NotificationError> {
            Ok(Vec::new())
        }
        async fn claim_stale(
            &self,
            _: &str,
            _: &str,
            _: Duration,
            _: usize,
        ) -> Result<Vec<StreamEntry>, NotificationError> {
            Ok(Vec::new())
        }
        async fn ack(&self, _: &str, _: &[String]) -> Result<u64, NotificationError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_publish_writes_flat_fields() {
        let stream = Arc::new(MemoryEventStream::new());
        let publisher = EventPublisher::new(stream.clone());
        let recipients = [Recipient::new(3, Role::Doctor).with_channel("in_app")];

        let id = publisher
            .publish(
                "APPOINTMENTS",
                "APPOINTMENT_CREATED",
                &json!({"appointment_id": 11}),
                Some(&recipients),
            )
            .await;
        assert!(id.is_some());

        stream.ensure_group("g", "0").await.unwrap();
        let entries = stream.read_group("g", "c", 10, Duration::ZERO).await.unwrap();
        let entry = &entries[0];
        assert_eq!(entry.field("service"), Some("APPOINTMENTS"));
        assert_eq!(entry.field("event_type"), Some("APPOINTMENT_CREATED"));
        assert!(entry.field("timestamp").is_some());

        let decoded: Vec<Recipient> =
            serde_json::from_str(entry.field("recipients").unwrap()).unwrap();
        assert_eq!(decoded, recipients);
        let data: Value = serde_json::from_str(entry.field("data").unwrap()).unwrap();
        assert_eq!(data["appointment_id"], 11);
    }

    #[tokio::test]
    async fn test_publish_failure_is_soft() {
        let publisher = EventPublisher::new(Arc::new(BrokenStream));
        let id = publisher.publish("BILLING", "PAYMENT_DUE", &json!({}), None).await;
        assert!(id.is_none());

        let err = publisher.try_publish("BILLING", "PAYMENT_DUE", &json!({}), None).await;
        assert!(matches!(err, Err(NotificationError::Stream(_))));
    }

    #[tokio::test]
    async fn test_publish_respects_cap() {
        let stream = Arc::new(MemoryEventStream::new());
        let publisher = EventPublisher::new(stream.clone()).with_max_len(3);
        for _ in 0..5 {
            publisher.publish("USERS", "USER_CREATED", &json!({}), None).await;
        }
        assert_eq!(stream.len(), 3);
    }
}
