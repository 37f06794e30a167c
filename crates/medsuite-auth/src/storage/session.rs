//! Session liveness tracking.
//!
//! Each authenticated request refreshes `session:{session_id}` and adds the id
//! to `user_sessions:{subject_id}`. Bookkeeping is best-effort: failures are
//! logged and never reach the request path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AuthResult;
use crate::identity::{Identity, Role};

#[must_use]
pub fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

#[must_use]
pub fn user_sessions_key(subject_id: i64) -> String {
    format!("user_sessions:{subject_id}")
}

/// Session record stored as a JSON blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub subject_id: i64,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Backing store for session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Writes `record` with `ttl`, adds it to the user's active set and
    /// returns the size of that set afterwards.
    async fn put(&self, record: &SessionRecord, ttl: Duration) -> AuthResult<usize>;
}

/// Best-effort session bookkeeping used by the request extractor.
#[derive(Clone)]
pub struct SessionTracker {
    store: Arc<dyn SessionStore>,
    ttl: Duration,
    max_sessions: usize,
}

impl SessionTracker {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, ttl: Duration, max_sessions: usize) -> Self {
        Self {
            store,
            ttl,
            max_sessions,
        }
    }

    /// Records activity for `session_id`. Never fails.
    ///
    /// The per-user cap is reported, not enforced: whether the oldest session
    /// should be evicted or the new one rejected is still undecided.
    pub async fn touch(
        &self,
        session_id: &str,
        identity: &Identity,
        client_ip: Option<&str>,
        user_agent: Option<&str>,
    ) {
        let record = SessionRecord {
            session_id: session_id.to_string(),
            subject_id: identity.subject_id,
            role: identity.role,
            last_activity: OffsetDateTime::now_utc(),
            client_ip: client_ip.map(ToString::to_string),
            user_agent: user_agent.map(ToString::to_string),
        };

        match self.store.put(&record, self.ttl).await {
            Ok(active) if active > self.max_sessions => {
                tracing::warn!(
                    subject_id = identity.subject_id,
                    active,
                    max = self.max_sessions,
                    "User exceeds configured session limit"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    subject_id = identity.subject_id,
                    "Failed to record session activity"
                );
            }
        }
    }
}
