use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use medsuite_auth::Role;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};

use crate::error::NotificationError;
use crate::taxonomy;
use crate::types::NotificationType;

/// Kinds of reminders the scheduler materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderCategory {
    Appointment,
    FollowUp,
    PaymentDue,
    MedicationRefill,
    LabTest,
}

impl ReminderCategory {
    pub const ALL: [ReminderCategory; 5] = [
        Self::Appointment,
        Self::FollowUp,
        Self::PaymentDue,
        Self::MedicationRefill,
        Self::LabTest,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Appointment => "appointment",
            Self::FollowUp => "follow_up",
            Self::PaymentDue => "payment_due",
            Self::MedicationRefill => "medication_refill",
            Self::LabTest => "lab_test",
        }
    }

    /// Service owning the candidate records.
    #[must_use]
    pub fn service(&self) -> &'static str {
        match self {
            Self::Appointment | Self::FollowUp => taxonomy::APPOINTMENTS,
            Self::PaymentDue => taxonomy::BILLING,
            Self::MedicationRefill => taxonomy::PHARMACY,
            Self::LabTest => taxonomy::LABORATORY,
        }
    }

    /// Path on the owning service listing records due within a window.
    #[must_use]
    pub fn path(&self) -> &'static str {
        match self {
            Self::Appointment => "/api/appointments/upcoming/",
            Self::FollowUp => "/api/appointments/follow-ups/due/",
            Self::PaymentDue => "/api/invoices/due/",
            Self::MedicationRefill => "/api/prescriptions/refills/due/",
            Self::LabTest => "/api/lab-tests/upcoming/",
        }
    }

    #[must_use]
    pub fn notification_type(&self) -> NotificationType {
        match self {
            Self::Appointment => NotificationType::AppointmentReminder,
            Self::FollowUp => NotificationType::FollowUpReminder,
            Self::PaymentDue => NotificationType::PaymentDue,
            Self::MedicationRefill => NotificationType::MedicationRefill,
            Self::LabTest => NotificationType::LabTest,
        }
    }

    #[must_use]
    pub fn reference_type(&self) -> &'static str {
        match self {
            Self::Appointment | Self::FollowUp => "appointment",
            Self::PaymentDue => "invoice",
            Self::MedicationRefill => "prescription",
            Self::LabTest => "lab_test",
        }
    }

    #[must_use]
    pub fn template_ref(&self) -> &'static str {
        match self {
            Self::Appointment => "appointment_reminder",
            Self::FollowUp => "follow_up_reminder",
            Self::PaymentDue => "payment_due_reminder",
            Self::MedicationRefill => "medication_refill_reminder",
            Self::LabTest => "lab_test_reminder",
        }
    }

    /// Record fields holding the due time, tried in order.
    fn due_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Appointment => &["scheduled_at", "appointment_date"],
            Self::FollowUp => &["follow_up_date"],
            Self::PaymentDue => &["due_date"],
            Self::MedicationRefill => &["refill_date", "next_refill_date"],
            Self::LabTest => &["scheduled_date", "scheduled_at"],
        }
    }
}

impl fmt::Display for ReminderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReminderCategory {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| {
                NotificationError::InvalidConfig(format!("unknown reminder category '{s}'"))
            })
    }
}

/// Upstream record due for a reminder.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderCandidate {
    pub category: ReminderCategory,
    pub reference_id: String,
    pub recipient_id: i64,
    pub recipient_type: Role,
    pub due_at: Option<OffsetDateTime>,
    /// Raw record, used for template variables.
    pub data: Map<String, Value>,
}

impl ReminderCandidate {
    /// Reads a candidate from an upstream JSON record.
    ///
    /// Needs an `id` and a `patient_id`; returns `None` otherwise.
    #[must_use]
    pub fn from_record(category: ReminderCategory, record: &Value) -> Option<Self> {
        let data = record.as_object()?;
        let reference_id = match data.get("id")? {
            Value::Number(n) => n.to_string(),
            Value::String(s) if !s.is_empty() => s.clone(),
            _ => return None,
        };
        let recipient_id = match data.get("patient_id")? {
            Value::Number(n) => n.as_i64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        let due_at = category
            .due_fields()
            .iter()
            .find_map(|f| data.get(*f).and_then(Value::as_str).and_then(parse_due));

        Some(Self {
            category,
            reference_id,
            recipient_id,
            recipient_type: Role::Patient,
            due_at,
            data: data.clone(),
        })
    }
}

/// Accepts RFC 3339 timestamps and plain `YYYY-MM-DD` dates (midnight UTC).
fn parse_due(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(ts);
    }
    let format = time::macros::format_description!("[year]-[month]-[day]");
    Date::parse(raw, &format)
        .ok()
        .map(|d| d.midnight().assume_utc())
}

/// Contact details from the user directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "phone_number")]
    pub phone: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Source of reminder candidates (the owning services).
#[async_trait]
pub trait ReminderSource: Send + Sync {
    async fn due_within(
        &self,
        category: ReminderCategory,
        lookahead: Duration,
    ) -> Result<Vec<ReminderCandidate>, NotificationError>;
}

/// Contact lookup (the users service).
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` when the user does not exist.
    async fn contact(&self, user_id: i64) -> Result<Option<Contact>, NotificationError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_category_parse() {
        assert_eq!("follow-up".parse::<ReminderCategory>().unwrap(), ReminderCategory::FollowUp);
        assert_eq!("LAB_TEST".parse::<ReminderCategory>().unwrap(), ReminderCategory::LabTest);
        assert!("dentist".parse::<ReminderCategory>().is_err());
    }

    #[test]
    fn test_candidate_from_record() {
        let candidate = ReminderCandidate::from_record(
            ReminderCategory::PaymentDue,
            &json!({"id": 90, "patient_id": "4", "due_date": "2026-03-01", "amount": 120}),
        )
        .unwrap();

        assert_eq!(candidate.reference_id, "90");
        assert_eq!(candidate.recipient_id, 4);
        assert_eq!(candidate.due_at.unwrap().date().to_string(), "2026-03-01");
        assert_eq!(candidate.data["amount"], 120);
    }

    #[test]
    fn test_candidate_requires_id_and_patient() {
        let category = ReminderCategory::Appointment;
        assert!(ReminderCandidate::from_record(category, &json!({"id": 1})).is_none());
        assert!(ReminderCandidate::from_record(category, &json!({"patient_id": 1})).is_none());
        assert!(ReminderCandidate::from_record(category, &json!([])).is_none());
    }
}
