//! In-memory storage for single-instance deployments and tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::revocation::RevocationList;
use super::session::{SessionRecord, SessionStore};
use crate::AuthResult;

/// Revocation list backed by a `DashMap` with per-entry expiry.
#[derive(Debug, Default)]
pub struct InMemoryRevocationList {
    entries: DashMap<String, Instant>,
}

impl InMemoryRevocationList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationList for InMemoryRevocationList {
    async fn is_revoked(&self, jti: &str) -> AuthResult<bool> {
        let Some(expires) = self.entries.get(jti).map(|e| *e.value()) else {
            return Ok(false);
        };
        if expires <= Instant::now() {
            self.entries.remove(jti);
            return Ok(false);
        }
        Ok(true)
    }

    async fn revoke(&self, jti: &str, ttl: Duration) -> AuthResult<()> {
        let now = Instant::now();
        self.entries.retain(|_, expires| *expires > now);
        self.entries.insert(jti.to_string(), now + ttl);
        Ok(())
    }
}

/// Session store backed by `DashMap`s.
///
/// Expired sessions of a user are dropped whenever that user writes again.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, (SessionRecord, Instant)>,
    by_user: DashMap<i64, HashMap<String, Instant>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live record for `session_id`.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions
            .get(session_id)
            .filter(|e| e.value().1 > Instant::now())
            .map(|e| e.value().0.clone())
    }

    /// Number of unexpired sessions for `subject_id`.
    #[must_use]
    pub fn active_sessions(&self, subject_id: i64) -> usize {
        let now = Instant::now();
        self.by_user
            .get(&subject_id)
            .map_or(0, |ids| ids.values().filter(|exp| **exp > now).count())
    }

    /// Number of session records held, live or not yet pruned.
    #[must_use]
    pub fn stored_sessions(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put(&self, record: &SessionRecord, ttl: Duration) -> AuthResult<usize> {
        let now = Instant::now();
        let expires = now + ttl;
        self.sessions
            .insert(record.session_id.clone(), (record.clone(), expires));

        let mut ids = self.by_user.entry(record.subject_id).or_default();
        let expired: Vec<String> = ids
            .iter()
            .filter(|(_, exp)| **exp <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            ids.remove(id);
            self.sessions.remove_if(id, |_, (_, exp)| *exp <= now);
        }
        ids.insert(record.session_id.clone(), expires);
        Ok(ids.len())
    }
}
