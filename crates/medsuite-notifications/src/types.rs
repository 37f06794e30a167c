use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use medsuite_auth::Role;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::NotificationError;

/// Channel name that selects in-app delivery in an event's recipient list.
pub const IN_APP_CHANNEL: &str = "in_app";

/// Notification taxonomy shared by in-app notifications and schedule entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Appointment,
    AppointmentReminder,
    FollowUpReminder,
    LabTest,
    LabResult,
    Prescription,
    MedicationRefill,
    Payment,
    PaymentDue,
    System,
}

impl NotificationType {
    pub const ALL: [NotificationType; 10] = [
        Self::Appointment,
        Self::AppointmentReminder,
        Self::FollowUpReminder,
        Self::LabTest,
        Self::LabResult,
        Self::Prescription,
        Self::MedicationRefill,
        Self::Payment,
        Self::PaymentDue,
        Self::System,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Appointment => "APPOINTMENT",
            Self::AppointmentReminder => "APPOINTMENT_REMINDER",
            Self::FollowUpReminder => "FOLLOW_UP_REMINDER",
            Self::LabTest => "LAB_TEST",
            Self::LabResult => "LAB_RESULT",
            Self::Prescription => "PRESCRIPTION",
            Self::MedicationRefill => "MEDICATION_REFILL",
            Self::Payment => "PAYMENT",
            Self::PaymentDue => "PAYMENT_DUE",
            Self::System => "SYSTEM",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                NotificationError::Serialization(format!("unknown notification type '{s}'"))
            })
    }
}

// ============================================================================
// In-app notifications
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InAppStatus {
    Unread,
    Read,
}

impl InAppStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unread => "UNREAD",
            Self::Read => "READ",
        }
    }
}

impl FromStr for InAppStatus {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNREAD" => Ok(Self::Unread),
            "READ" => Ok(Self::Read),
            other => Err(NotificationError::Serialization(format!(
                "unknown notification status '{other}'"
            ))),
        }
    }
}

/// Notification shown inside the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InAppNotification {
    pub id: Uuid,
    pub recipient_id: i64,
    pub recipient_type: Role,
    pub notification_type: NotificationType,
    pub title: String,
    pub content: String,
    pub status: InAppStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_type: Option<String>,
    pub is_urgent: bool,
    pub service: String,
    pub event_type: String,
    pub metadata: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub read_at: Option<OffsetDateTime>,
}

// ============================================================================
// Schedule entries
// ============================================================================

/// Outbound delivery channel for scheduled notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryChannel {
    Email,
    Sms,
}

impl DeliveryChannel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Sms => "SMS",
        }
    }
}

impl FromStr for DeliveryChannel {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EMAIL" => Ok(Self::Email),
            "SMS" => Ok(Self::Sms),
            other => Err(NotificationError::Serialization(format!(
                "unknown delivery channel '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Scheduled,
    Sent,
    Failed,
}

impl ScheduleStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }
}

impl FromStr for ScheduleStatus {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(Self::Scheduled),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            other => Err(NotificationError::Serialization(format!(
                "unknown schedule status '{other}'"
            ))),
        }
    }
}

/// Logical identity of a reminder; at most one SCHEDULED entry per key and channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScheduleKey {
    pub recipient_id: i64,
    pub notification_type: NotificationType,
    pub reference_type: String,
    pub reference_id: String,
}

/// Pending outbound notification picked up by the delivery worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: Uuid,
    pub recipient_id: i64,
    pub recipient_type: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_phone: Option<String>,
    pub notification_type: NotificationType,
    pub channel: DeliveryChannel,
    pub subject: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_at: OffsetDateTime,
    pub status: ScheduleStatus,
    pub template_ref: String,
    pub reference_id: String,
    pub reference_type: String,
}

impl ScheduleEntry {
    #[must_use]
    pub fn key(&self) -> ScheduleKey {
        ScheduleKey {
            recipient_id: self.recipient_id,
            notification_type: self.notification_type,
            reference_type: self.reference_type.clone(),
            reference_id: self.reference_id.clone(),
        }
    }
}

// ============================================================================
// Stream events
// ============================================================================

/// Recipient carried by a stream event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub recipient_id: i64,
    pub recipient_type: Role,
    /// Empty means no channel filtering.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub channels: BTreeSet<String>,
}

impl Recipient {
    #[must_use]
    pub fn new(recipient_id: i64, recipient_type: Role) -> Self {
        Self {
            recipient_id,
            recipient_type,
            channels: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channels.insert(channel.into());
        self
    }

    /// True when the recipient wants in-app delivery or did not filter channels.
    #[must_use]
    pub fn accepts_in_app(&self) -> bool {
        self.channels.is_empty()
            || self
                .channels
                .iter()
                .any(|c| c.eq_ignore_ascii_case(IN_APP_CHANNEL))
    }
}

/// Decoded stream entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub message_id: String,
    pub service: String,
    pub event_type: String,
    pub timestamp: Option<OffsetDateTime>,
    pub recipients: Vec<Recipient>,
    pub data: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_type_roundtrip() {
        for t in NotificationType::ALL {
            assert_eq!(t.as_str().parse::<NotificationType>().unwrap(), t);
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn test_accepts_in_app() {
        let r = Recipient::new(1, Role::Patient);
        assert!(r.accepts_in_app());
        assert!(r.clone().with_channel("IN_APP").accepts_in_app());
        assert!(!r.with_channel("email").accepts_in_app());
    }
}
