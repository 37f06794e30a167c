//! HTTP integration: request extractor and error responses.

pub mod auth;
pub mod error;

pub use auth::{AuthState, Authenticated, SESSION_ID_HEADER, client_ip};
pub use error::status_code;
