//! Declarative permission table.
//!
//! Each `(ResourceKind, Action)` pair maps to one [`Rule`]. ADMIN bypasses
//! the table entirely and any pair without an entry denies.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::identity::Role;

/// Resource families guarded by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Appointment,
    MedicalRecord,
    Prescription,
    LabTest,
    Notification,
    Event,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        Self::Appointment,
        Self::MedicalRecord,
        Self::Prescription,
        Self::LabTest,
        Self::Notification,
        Self::Event,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Appointment => "appointment",
            Self::MedicalRecord => "medical_record",
            Self::Prescription => "prescription",
            Self::LabTest => "lab_test",
            Self::Notification => "notification",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| AuthError::malformed(format!("unknown resource type '{s}'")))
    }
}

/// Operations on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    List,
    Read,
    Create,
    Update,
    Delete,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Self::List,
        Self::Read,
        Self::Create,
        Self::Update,
        Self::Delete,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AuthError;

    /// Accepts REST verbs and viewset action names (`retrieve`, `partial_update`, `destroy`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "list" => Ok(Self::List),
            "read" | "retrieve" | "get" => Ok(Self::Read),
            "create" | "post" => Ok(Self::Create),
            "update" | "partial_update" | "put" | "patch" => Ok(Self::Update),
            "delete" | "destroy" => Ok(Self::Delete),
            other => Err(AuthError::malformed(format!("unknown action '{other}'"))),
        }
    }
}

/// Predicate over the caller's role and, when an object is supplied, its
/// relationship to that object.
#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// The role may act on every object of the kind.
    Role(Role),
    /// The caller must be the party named by `field` on the object.
    ///
    /// `role: None` admits any role. `field: None` searches the engine's
    /// configured owner fields. Without an object only the role is checked;
    /// collection endpoints are expected to filter by owner themselves.
    Owned {
        role: Option<Role>,
        field: Option<&'static str>,
    },
    /// Any alternative may grant access.
    AnyOf(Vec<Rule>),
}

impl Rule {
    /// Patient-owner rule using the configured owner fields.
    #[must_use]
    pub fn owner(role: Role) -> Self {
        Self::Owned {
            role: Some(role),
            field: None,
        }
    }

    /// Assigned professional named by `field` (e.g. `doctor_id`).
    #[must_use]
    pub fn assigned(role: Role, field: &'static str) -> Self {
        Self::Owned {
            role: Some(role),
            field: Some(field),
        }
    }

    /// Any role, matched against `field`.
    #[must_use]
    pub fn subject(field: &'static str) -> Self {
        Self::Owned {
            role: None,
            field: Some(field),
        }
    }
}

/// Rule table keyed by resource kind and action.
pub type RuleTable = HashMap<(ResourceKind, Action), Rule>;

/// The permission matrix shared by the suite's services.
#[must_use]
pub fn default_rules() -> RuleTable {
    use Action::{Create, Delete, List, Read, Update};
    use ResourceKind::{Appointment, LabTest, MedicalRecord, Notification, Prescription};
    use Role::{Doctor, LabTechnician, Nurse, Patient, Pharmacist};

    let mut table = RuleTable::new();
    let mut set = |kind: ResourceKind, actions: &[Action], rule: Rule| {
        for action in actions {
            table.insert((kind, *action), rule.clone());
        }
    };

    // Appointments: nurses run the front desk, doctors see their own schedule.
    set(
        Appointment,
        &[List, Read, Create, Update],
        Rule::AnyOf(vec![
            Rule::Role(Nurse),
            Rule::owner(Patient),
            Rule::assigned(Doctor, "doctor_id"),
        ]),
    );
    set(Appointment, &[Delete], Rule::Role(Nurse));

    set(
        MedicalRecord,
        &[List, Read],
        Rule::AnyOf(vec![
            Rule::Role(Nurse),
            Rule::owner(Patient),
            Rule::assigned(Doctor, "doctor_id"),
        ]),
    );
    set(
        MedicalRecord,
        &[Create, Update],
        Rule::AnyOf(vec![Rule::Role(Nurse), Rule::assigned(Doctor, "doctor_id")]),
    );

    set(
        Prescription,
        &[List, Read],
        Rule::AnyOf(vec![
            Rule::Role(Pharmacist),
            Rule::Role(Nurse),
            Rule::owner(Patient),
            Rule::assigned(Doctor, "doctor_id"),
        ]),
    );
    set(Prescription, &[Create], Rule::assigned(Doctor, "doctor_id"));
    set(
        Prescription,
        &[Update],
        Rule::AnyOf(vec![
            Rule::Role(Pharmacist),
            Rule::assigned(Doctor, "doctor_id"),
        ]),
    );

    set(
        LabTest,
        &[List, Read],
        Rule::AnyOf(vec![
            Rule::Role(LabTechnician),
            Rule::Role(Nurse),
            Rule::owner(Patient),
            Rule::assigned(Doctor, "doctor_id"),
        ]),
    );
    set(
        LabTest,
        &[Create, Update],
        Rule::AnyOf(vec![
            Rule::Role(LabTechnician),
            Rule::assigned(Doctor, "doctor_id"),
        ]),
    );

    set(
        Notification,
        &[List, Read, Update],
        Rule::subject("recipient_id"),
    );

    // Event ingest and the deletions not listed above are ADMIN only.
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resource_kind() {
        assert_eq!(
            "medical-record".parse::<ResourceKind>().unwrap(),
            ResourceKind::MedicalRecord
        );
        assert_eq!("LAB_TEST".parse::<ResourceKind>().unwrap(), ResourceKind::LabTest);
        assert!("invoice".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_parse_action_aliases() {
        assert_eq!("retrieve".parse::<Action>().unwrap(), Action::Read);
        assert_eq!("partial_update".parse::<Action>().unwrap(), Action::Update);
        assert_eq!("destroy".parse::<Action>().unwrap(), Action::Delete);
        assert!("approve".parse::<Action>().is_err());
    }

    #[test]
    fn test_default_table_has_no_event_rules() {
        let table = default_rules();
        for action in Action::ALL {
            assert!(!table.contains_key(&(ResourceKind::Event, action)));
        }
        assert!(!table.contains_key(&(ResourceKind::MedicalRecord, Action::Delete)));
        assert!(table.contains_key(&(ResourceKind::Appointment, Action::Read)));
    }
}
