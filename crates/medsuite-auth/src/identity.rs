//! The authenticated caller for a single request.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Roles known to every service in the suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Doctor,
    Nurse,
    Patient,
    Pharmacist,
    LabTechnician,
    InsuranceProvider,
}

impl Role {
    /// Canonical wire representation (`LAB_TECHNICIAN`, ...).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::Doctor => "DOCTOR",
            Self::Nurse => "NURSE",
            Self::Patient => "PATIENT",
            Self::Pharmacist => "PHARMACIST",
            Self::LabTechnician => "LAB_TECHNICIAN",
            Self::InsuranceProvider => "INSURANCE_PROVIDER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Self::Admin),
            "DOCTOR" => Ok(Self::Doctor),
            "NURSE" => Ok(Self::Nurse),
            "PATIENT" => Ok(Self::Patient),
            "PHARMACIST" => Ok(Self::Pharmacist),
            "LAB_TECHNICIAN" => Ok(Self::LabTechnician),
            "INSURANCE_PROVIDER" => Ok(Self::InsuranceProvider),
            other => Err(AuthError::malformed(format!("unknown role '{other}'"))),
        }
    }
}

/// Authenticated caller, rebuilt on every request from headers or token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub subject_id: i64,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    /// Token id when the identity came from a token (or a forwarded `X-Token-Jti`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Token expiry as a unix timestamp, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Identity {
    /// Creates an identity with only the required fields.
    #[must_use]
    pub fn new(subject_id: i64, role: Role) -> Self {
        Self {
            subject_id,
            role,
            email: None,
            given_name: None,
            family_name: None,
            jti: None,
            expires_at: None,
            extra: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Display name built from given and family names.
    #[must_use]
    pub fn full_name(&self) -> Option<String> {
        match (self.given_name.as_deref(), self.family_name.as_deref()) {
            (Some(g), Some(f)) => Some(format!("{g} {f}")),
            (Some(n), None) | (None, Some(n)) => Some(n.to_string()),
            (None, None) => None,
        }
    }
}
