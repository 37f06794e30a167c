//! Storage contracts for the shared cache.
//!
//! The Redis implementations live in the service crate; in-memory versions
//! are provided here for single-process use and tests.

pub mod memory;
pub mod revocation;
pub mod session;

pub use memory::{InMemoryRevocationList, InMemorySessionStore};
pub use revocation::{RevocationList, revocation_key};
pub use session::{SessionRecord, SessionStore, SessionTracker, session_key, user_sessions_key};
