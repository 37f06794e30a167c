//! Static tables mapping stream events to notification attributes.
//!
//! Lookups are keyed by `(service, event_type)` with per-service defaults
//! and a global fallback of [`NotificationType::System`].

use medsuite_auth::Role;
use serde_json::{Map, Value};

use crate::types::{NotificationType, Recipient};

pub const APPOINTMENTS: &str = "APPOINTMENTS";
pub const LABORATORY: &str = "LABORATORY";
pub const PHARMACY: &str = "PHARMACY";
pub const BILLING: &str = "BILLING";
pub const USERS: &str = "USERS";

// ============================================================================
// Tables
// ============================================================================

const EVENT_TYPES: &[(&str, &str, NotificationType)] = &[
    (APPOINTMENTS, "APPOINTMENT_CREATED", NotificationType::Appointment),
    (APPOINTMENTS, "APPOINTMENT_CONFIRMED", NotificationType::Appointment),
    (APPOINTMENTS, "APPOINTMENT_RESCHEDULED", NotificationType::Appointment),
    (APPOINTMENTS, "APPOINTMENT_CANCELLED", NotificationType::Appointment),
    (APPOINTMENTS, "APPOINTMENT_COMPLETED", NotificationType::Appointment),
    (APPOINTMENTS, "APPOINTMENT_REMINDER", NotificationType::AppointmentReminder),
    (APPOINTMENTS, "FOLLOW_UP_REMINDER", NotificationType::FollowUpReminder),
    (LABORATORY, "LAB_TEST_ORDERED", NotificationType::LabTest),
    (LABORATORY, "LAB_TEST_SCHEDULED", NotificationType::LabTest),
    (LABORATORY, "SAMPLE_COLLECTED", NotificationType::LabTest),
    (LABORATORY, "LAB_RESULT_READY", NotificationType::LabResult),
    (LABORATORY, "LAB_RESULT_CRITICAL", NotificationType::LabResult),
    (PHARMACY, "PRESCRIPTION_CREATED", NotificationType::Prescription),
    (PHARMACY, "PRESCRIPTION_FILLED", NotificationType::Prescription),
    (PHARMACY, "PRESCRIPTION_READY", NotificationType::Prescription),
    (PHARMACY, "PRESCRIPTION_CANCELLED", NotificationType::Prescription),
    (PHARMACY, "MEDICATION_REFILL_DUE", NotificationType::MedicationRefill),
    (BILLING, "INVOICE_CREATED", NotificationType::Payment),
    (BILLING, "PAYMENT_RECEIVED", NotificationType::Payment),
    (BILLING, "PAYMENT_FAILED", NotificationType::Payment),
    (BILLING, "PAYMENT_DUE", NotificationType::PaymentDue),
    (BILLING, "INVOICE_OVERDUE", NotificationType::PaymentDue),
];

const SERVICE_DEFAULTS: &[(&str, NotificationType)] = &[
    (APPOINTMENTS, NotificationType::Appointment),
    (LABORATORY, NotificationType::LabTest),
    (PHARMACY, NotificationType::Prescription),
    (BILLING, NotificationType::Payment),
    (USERS, NotificationType::System),
];

const URGENT_EVENTS: &[(&str, &str)] = &[
    (APPOINTMENTS, "APPOINTMENT_CANCELLED"),
    (APPOINTMENTS, "APPOINTMENT_RESCHEDULED"),
    (LABORATORY, "LAB_RESULT_CRITICAL"),
    (PHARMACY, "PRESCRIPTION_CANCELLED"),
    (BILLING, "PAYMENT_FAILED"),
    (BILLING, "INVOICE_OVERDUE"),
];

/// Service-specific data fields naming extra recipients.
const EXTRA_RECIPIENTS: &[(&str, &str, Role)] = &[
    (LABORATORY, "technician_id", Role::LabTechnician),
    (PHARMACY, "pharmacist_id", Role::Pharmacist),
];

/// Reference type and candidate id fields per service.
const REFERENCES: &[(&str, &str, &[&str])] = &[
    (APPOINTMENTS, "appointment", &["appointment_id"]),
    (LABORATORY, "lab_test", &["lab_test_id", "test_id"]),
    (PHARMACY, "prescription", &["prescription_id"]),
    (BILLING, "invoice", &["invoice_id"]),
];

// ============================================================================
// Lookups
// ============================================================================

/// Notification type for an event.
#[must_use]
pub fn notification_type(service: &str, event_type: &str) -> NotificationType {
    EVENT_TYPES
        .iter()
        .find(|(s, e, _)| s.eq_ignore_ascii_case(service) && e.eq_ignore_ascii_case(event_type))
        .map(|(_, _, t)| *t)
        .or_else(|| {
            SERVICE_DEFAULTS
                .iter()
                .find(|(s, _)| s.eq_ignore_ascii_case(service))
                .map(|(_, t)| *t)
        })
        .unwrap_or(NotificationType::System)
}

/// Whether the event should be flagged urgent.
///
/// Abnormal laboratory results are always urgent, as is any event whose
/// payload sets `is_urgent`.
#[must_use]
pub fn is_urgent(service: &str, event_type: &str, data: &Map<String, Value>) -> bool {
    if flag(data, "is_urgent") {
        return true;
    }
    if service.eq_ignore_ascii_case(LABORATORY) && flag(data, "is_abnormal") {
        return true;
    }
    URGENT_EVENTS
        .iter()
        .any(|(s, e)| s.eq_ignore_ascii_case(service) && e.eq_ignore_ascii_case(event_type))
}

/// Recipients derived from well-known data fields when an event names none.
#[must_use]
pub fn default_recipients(service: &str, data: &Map<String, Value>) -> Vec<Recipient> {
    let mut fields: Vec<(&str, Role)> =
        vec![("patient_id", Role::Patient), ("doctor_id", Role::Doctor)];
    fields.extend(
        EXTRA_RECIPIENTS
            .iter()
            .filter(|(s, _, _)| s.eq_ignore_ascii_case(service))
            .map(|(_, field, role)| (*field, *role)),
    );

    let mut recipients: Vec<Recipient> = Vec::new();
    for (field, role) in fields {
        let Some(id) = data.get(field).and_then(as_id) else {
            continue;
        };
        if !recipients
            .iter()
            .any(|r| r.recipient_id == id && r.recipient_type == role)
        {
            recipients.push(Recipient::new(id, role));
        }
    }
    recipients
}

/// `(reference_type, reference_id)` for an event.
///
/// Explicit `reference_type` / `reference_id` fields in the payload win over
/// the per-service id fields.
#[must_use]
pub fn reference(service: &str, data: &Map<String, Value>) -> (Option<String>, Option<String>) {
    let explicit_type = data.get("reference_type").and_then(as_text);
    let explicit_id = data.get("reference_id").and_then(as_text);
    if explicit_type.is_some() || explicit_id.is_some() {
        return (explicit_type, explicit_id);
    }

    REFERENCES
        .iter()
        .find(|(s, _, _)| s.eq_ignore_ascii_case(service))
        .and_then(|(_, kind, fields)| {
            fields
                .iter()
                .find_map(|f| data.get(*f).and_then(as_text))
                .map(|id| (Some((*kind).to_string()), Some(id)))
        })
        .unwrap_or((None, None))
}

/// Human readable title: payload `title`, else the event type in sentence case.
#[must_use]
pub fn title(event_type: &str, data: &Map<String, Value>) -> String {
    if let Some(title) = data.get("title").and_then(Value::as_str).filter(|t| !t.is_empty()) {
        return title.to_string();
    }
    let words = event_type.replace('_', " ").to_lowercase();
    let mut chars = words.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Notification".to_string(),
    }
}

/// Body text: payload `message`, else a short summary.
#[must_use]
pub fn content(service: &str, event_type: &str, data: &Map<String, Value>) -> String {
    data.get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| format!("{} ({})", title(event_type, data), service.to_lowercase()))
}

fn flag(data: &Map<String, Value>, field: &str) -> bool {
    match data.get(field) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Accepts integers and numeric strings.
fn as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
