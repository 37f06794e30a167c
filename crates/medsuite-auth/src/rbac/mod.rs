//! Role-based access control.
//!
//! The engine evaluates a [`RuleTable`] against an optional [`Identity`] and
//! an optional JSON object:
//!
//! - no identity: deny
//! - ADMIN: allow
//! - no rule for `(kind, action)`: deny
//! - otherwise the rule decides
//!
//! # Example
//!
//! ```ignore
//! use medsuite_auth::rbac::{Action, RbacEngine, ResourceKind};
//!
//! let engine = RbacEngine::default();
//! let appointment = serde_json::json!({ "id": 1, "patient_id": 7, "doctor_id": 3 });
//! let allowed = engine.authorize(
//!     Some(&identity),
//!     ResourceKind::Appointment,
//!     Action::Read,
//!     Some(&appointment),
//! );
//! ```

mod rules;

pub use rules::{Action, ResourceKind, Rule, RuleTable, default_rules};

use serde::Serialize;
use serde_json::Value;

use crate::AuthResult;
use crate::error::AuthError;
use crate::identity::Identity;

/// Fields searched for the owner when a rule does not name one.
pub const DEFAULT_OWNER_FIELDS: [&str; 3] = ["patient_id", "user_id", "owner_id"];

// =============================================================================
// Access Decision
// =============================================================================

/// Result of evaluating the rule table.
#[derive(Debug, Clone)]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    #[must_use]
    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Self::Deny(reason) => Some(reason),
            Self::Allow => None,
        }
    }
}

/// Reason for access denial.
#[derive(Debug, Clone, Serialize)]
pub struct DenyReason {
    /// Error code for programmatic handling.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
}

impl DenyReason {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Evaluates the permission table.
#[derive(Debug, Clone)]
pub struct RbacEngine {
    rules: RuleTable,
    owner_fields: Vec<String>,
}

impl Default for RbacEngine {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl RbacEngine {
    #[must_use]
    pub fn new(rules: RuleTable) -> Self {
        Self {
            rules,
            owner_fields: DEFAULT_OWNER_FIELDS.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    /// Replaces the owner field search list.
    #[must_use]
    pub fn with_owner_fields(mut self, fields: Vec<String>) -> Self {
        self.owner_fields = fields;
        self
    }

    /// Adds or replaces the rule for `(kind, action)`.
    #[must_use]
    pub fn with_rule(mut self, kind: ResourceKind, action: Action, rule: Rule) -> Self {
        self.rules.insert((kind, action), rule);
        self
    }

    /// Returns `true` if `identity` may perform `action` on `kind`.
    #[must_use]
    pub fn authorize(
        &self,
        identity: Option<&Identity>,
        kind: ResourceKind,
        action: Action,
        object: Option<&Value>,
    ) -> bool {
        self.evaluate(identity, kind, action, object).is_allowed()
    }

    /// Like [`Self::authorize`] but returns an error suitable for a response.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` without an identity, `Forbidden` on denial.
    pub fn enforce(
        &self,
        identity: Option<&Identity>,
        kind: ResourceKind,
        action: Action,
        object: Option<&Value>,
    ) -> AuthResult<()> {
        match self.evaluate(identity, kind, action, object) {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny(reason) if reason.code == "unauthenticated" => {
                Err(AuthError::unauthenticated(reason.message))
            }
            AccessDecision::Deny(reason) => Err(AuthError::forbidden(reason.message)),
        }
    }

    /// Evaluates the table and explains denials.
    #[must_use]
    pub fn evaluate(
        &self,
        identity: Option<&Identity>,
        kind: ResourceKind,
        action: Action,
        object: Option<&Value>,
    ) -> AccessDecision {
        let Some(identity) = identity else {
            return AccessDecision::Deny(DenyReason::new(
                "unauthenticated",
                "Authentication credentials were not provided",
            ));
        };

        if identity.is_admin() {
            return AccessDecision::Allow;
        }

        let Some(rule) = self.rules.get(&(kind, action)) else {
            return AccessDecision::Deny(DenyReason::new(
                "no_rule",
                format!("{} may not {action} {kind}", identity.role),
            ));
        };

        if self.matches(rule, identity, object) {
            AccessDecision::Allow
        } else {
            tracing::debug!(
                subject_id = identity.subject_id,
                role = %identity.role,
                resource = %kind,
                action = %action,
                "Access denied"
            );
            AccessDecision::Deny(DenyReason::new(
                "rule_denied",
                format!("{} may not {action} this {kind}", identity.role),
            ))
        }
    }

    fn matches(&self, rule: &Rule, identity: &Identity, object: Option<&Value>) -> bool {
        match rule {
            Rule::Role(role) => identity.role == *role,
            Rule::AnyOf(rules) => rules.iter().any(|r| self.matches(r, identity, object)),
            Rule::Owned { role, field } => {
                if role.is_some_and(|r| r != identity.role) {
                    return false;
                }
                let Some(object) = object else {
                    return true;
                };
                match field {
                    Some(field) => field_matches(object, field, identity.subject_id),
                    None => self.owner_matches(object, identity.subject_id),
                }
            }
        }
    }

    /// The first owner field present on the object decides.
    fn owner_matches(&self, object: &Value, subject_id: i64) -> bool {
        self.owner_fields
            .iter()
            .find_map(|f| object.get(f.as_str()).filter(|v| !v.is_null()))
            .is_some_and(|v| value_is_subject(v, subject_id))
    }
}

fn field_matches(object: &Value, field: &str, subject_id: i64) -> bool {
    object
        .get(field)
        .is_some_and(|v| value_is_subject(v, subject_id))
}

/// Accepts numbers, numeric strings and nested `{ "id": .. }` objects.
fn value_is_subject(value: &Value, subject_id: i64) -> bool {
    match value {
        Value::Number(n) => n.as_i64() == Some(subject_id),
        Value::String(s) => s.trim().parse::<i64>().ok() == Some(subject_id),
        Value::Object(map) => map.get("id").is_some_and(|v| value_is_subject(v, subject_id)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::identity::Role;

    fn who(id: i64, role: Role) -> Identity {
        Identity::new(id, role)
    }

    #[test]
    fn test_admin_always_allowed() {
        let engine = RbacEngine::default();
        let admin = who(1, Role::Admin);
        let objects = [None, Some(json!({})), Some(json!({ "patient_id": 99 }))];

        for kind in ResourceKind::ALL {
            for action in Action::ALL {
                for object in &objects {
                    assert!(engine.authorize(Some(&admin), kind, action, object.as_ref()));
                }
            }
        }
    }

    #[test]
    fn test_patient_reads_only_own_appointment() {
        let engine = RbacEngine::default();
        let patient = who(7, Role::Patient);

        for (owner, expected) in [(7, true), (8, false), (0, false)] {
            let appointment = json!({ "id": 1, "patient_id": owner, "doctor_id": 7 });
            assert_eq!(
                engine.authorize(
                    Some(&patient),
                    ResourceKind::Appointment,
                    Action::Read,
                    Some(&appointment)
                ),
                expected,
                "patient_id={owner}"
            );
        }
    }

    #[test]
    fn test_assigned_doctor() {
        let engine = RbacEngine::default();
        let doctor = who(3, Role::Doctor);
        let mine = json!({ "patient_id": 7, "doctor_id": 3 });
        let theirs = json!({ "patient_id": 7, "doctor_id": 4 });

        assert!(engine.authorize(
            Some(&doctor),
            ResourceKind::MedicalRecord,
            Action::Read,
            Some(&mine)
        ));
        assert!(!engine.authorize(
            Some(&doctor),
            ResourceKind::MedicalRecord,
            Action::Read,
            Some(&theirs)
        ));
    }

    #[test]
    fn test_operational_roles_unconditional() {
        let engine = RbacEngine::default();
        let record = json!({ "patient_id": 7, "doctor_id": 3 });

        assert!(engine.authorize(
            Some(&who(50, Role::Pharmacist)),
            ResourceKind::Prescription,
            Action::Update,
            Some(&record)
        ));
        assert!(engine.authorize(
            Some(&who(51, Role::LabTechnician)),
            ResourceKind::LabTest,
            Action::Update,
            Some(&record)
        ));
        assert!(engine.authorize(
            Some(&who(52, Role::Nurse)),
            ResourceKind::Appointment,
            Action::Delete,
            Some(&record)
        ));
        assert!(!engine.authorize(
            Some(&who(50, Role::Pharmacist)),
            ResourceKind::LabTest,
            Action::Read,
            Some(&record)
        ));
    }

    #[test]
    fn test_unauthenticated_denied() {
        let engine = RbacEngine::default();
        assert!(!engine.authorize(None, ResourceKind::Appointment, Action::List, None));
        assert!(matches!(
            engine.enforce(None, ResourceKind::Appointment, Action::List, None),
            Err(AuthError::Unauthenticated { .. })
        ));
    }

    #[test]
    fn test_default_deny() {
        let engine = RbacEngine::default();
        let insurer = who(9, Role::InsuranceProvider);
        for kind in ResourceKind::ALL {
            for action in Action::ALL {
                assert!(!engine.authorize(
                    Some(&insurer),
                    kind,
                    action,
                    Some(&json!({ "patient_id": 9 }))
                ));
            }
        }
        assert!(matches!(
            engine.enforce(Some(&insurer), ResourceKind::Event, Action::Create, None),
            Err(AuthError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_owner_field_search_order() {
        let engine = RbacEngine::default();
        let patient = who(7, Role::Patient);

        let by_user = json!({ "user_id": 7 });
        assert!(engine.authorize(
            Some(&patient),
            ResourceKind::Appointment,
            Action::Read,
            Some(&by_user)
        ));

        let nested = json!({ "patient_id": { "id": "7" } });
        assert!(engine.authorize(
            Some(&patient),
            ResourceKind::Appointment,
            Action::Read,
            Some(&nested)
        ));

        let engine = engine.with_owner_fields(vec!["member_id".into()]);
        assert!(!engine.authorize(
            Some(&patient),
            ResourceKind::Appointment,
            Action::Read,
            Some(&by_user)
        ));
    }

    #[test]
    fn test_notification_recipient() {
        let engine = RbacEngine::default();
        let doctor = who(3, Role::Doctor);
        let note = json!({ "recipient_id": 3 });
        assert!(engine.authorize(
            Some(&doctor),
            ResourceKind::Notification,
            Action::Update,
            Some(&note)
        ));
        assert!(!engine.authorize(
            Some(&who(4, Role::Doctor)),
            ResourceKind::Notification,
            Action::Update,
            Some(&note)
        ));
    }

    #[test]
    fn test_custom_rule() {
        let engine = RbacEngine::default().with_rule(
            ResourceKind::Event,
            Action::Create,
            Rule::Role(Role::Doctor),
        );
        assert!(engine.authorize(
            Some(&who(3, Role::Doctor)),
            ResourceKind::Event,
            Action::Create,
            None
        ));
    }
}
