//! Shared authentication and authorization for MedSuite services.
//!
//! Every inbound request goes through the [`CredentialVerifier`] and then
//! the [`RbacEngine`] before reaching handler logic.
//!
//! - [`verifier`]: trusted gateway headers or HS256 bearer tokens, with a
//!   revocation list check
//! - [`rbac`]: table-driven role and ownership rules
//! - [`storage`]: revocation list and session store contracts
//! - [`middleware`]: axum extractor and `IntoResponse` for [`AuthError`]

pub mod config;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod rbac;
pub mod storage;
pub mod token;
pub mod verifier;

pub use config::AuthConfig;
pub use error::{AuthError, ErrorCategory};
pub use identity::{Identity, Role};
pub use rbac::{AccessDecision, Action, RbacEngine, ResourceKind, Rule};
pub use verifier::CredentialVerifier;

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Commonly used types.
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::config::AuthConfig;
    pub use crate::error::AuthError;
    pub use crate::identity::{Identity, Role};
    pub use crate::middleware::{AuthState, Authenticated};
    pub use crate::rbac::{Action, RbacEngine, ResourceKind};
    pub use crate::storage::{RevocationList, SessionStore, SessionTracker};
    pub use crate::token::{JwtService, TokenClaims};
    pub use crate::verifier::CredentialVerifier;
}
