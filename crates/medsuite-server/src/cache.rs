//! Redis connection pool and the Redis-backed auth stores.
//!
//! ## Keys
//!
//! - `blacklist_token:{jti}`: any non-empty value means revoked, TTL bound
//! - `session:{id}`: JSON session record, TTL bound
//! - `user_sessions:{subject_id}`: sorted set of session ids scored by their
//!   expiry in unix milliseconds. Expired members are dropped on every touch.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use medsuite_auth::AuthError;
use medsuite_auth::AuthResult;
use medsuite_auth::storage::{
    RevocationList, SessionRecord, SessionStore, revocation_key, session_key, user_sessions_key,
};
use redis::AsyncCommands;

use crate::config::RedisConfig;

/// Builds the pool and checks that a connection can be opened.
pub async fn create_redis_pool(config: &RedisConfig) -> Result<Pool, String> {
    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    if let Some(ref mut pool_config) = redis_config.pool {
        pool_config.max_size = config.pool_size;
        pool_config.timeouts.wait = Some(Duration::from_millis(config.timeout_ms));
        pool_config.timeouts.create = Some(Duration::from_millis(config.timeout_ms));
        pool_config.timeouts.recycle = Some(Duration::from_millis(config.timeout_ms));
    }

    let pool = redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| format!("failed to create Redis pool: {e}"))?;

    pool.get()
        .await
        .map_err(|e| format!("failed to connect to Redis: {e}"))?;
    tracing::info!("Connected to Redis");

    Ok(pool)
}

/// `PING` through the pool.
pub async fn ping(pool: &Pool) -> Result<(), String> {
    let mut conn = pool.get().await.map_err(|e| e.to_string())?;
    let pong: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| e.to_string())?;
    if pong == "PONG" {
        Ok(())
    } else {
        Err(format!("unexpected PING reply '{pong}'"))
    }
}

async fn conn(pool: &Pool) -> AuthResult<Connection> {
    pool.get()
        .await
        .map_err(|e| AuthError::storage(format!("Redis pool error: {e}")))
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn unix_millis_now() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

// =============================================================================
// Revocation list
// =============================================================================

#[derive(Clone)]
pub struct RedisRevocationList {
    pool: Pool,
}

impl RedisRevocationList {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevocationList for RedisRevocationList {
    async fn is_revoked(&self, jti: &str) -> AuthResult<bool> {
        let mut conn = conn(&self.pool).await?;
        let value: Option<String> = conn
            .get(revocation_key(jti))
            .await
            .map_err(|e| AuthError::storage(e.to_string()))?;
        Ok(value.is_some_and(|v| !v.is_empty()))
    }

    async fn revoke(&self, jti: &str, ttl: Duration) -> AuthResult<()> {
        let mut conn = conn(&self.pool).await?;
        conn.set_ex::<_, _, ()>(revocation_key(jti), "1", ttl_secs(ttl))
            .await
            .map_err(|e| AuthError::storage(e.to_string()))?;
        tracing::debug!(jti, ttl_secs = ttl_secs(ttl), "Token revoked");
        Ok(())
    }
}

// =============================================================================
// Session store
// =============================================================================

#[derive(Clone)]
pub struct RedisSessionStore {
    pool: Pool,
}

impl RedisSessionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, record: &SessionRecord, ttl: Duration) -> AuthResult<usize> {
        let payload = serde_json::to_string(record)
            .map_err(|e| AuthError::internal(format!("session encode: {e}")))?;
        let secs = ttl_secs(ttl);
        let set_key = user_sessions_key(record.subject_id);
        let now_ms = unix_millis_now();
        let expires_ms = now_ms + (secs as i64) * 1000;

        let mut conn = conn(&self.pool).await?;
        let (active,): (usize,) = redis::pipe()
            .atomic()
            .set_ex(session_key(&record.session_id), payload, secs)
            .ignore()
            .zrembyscore(&set_key, "-inf", now_ms)
            .ignore()
            .zadd(&set_key, &record.session_id, expires_ms)
            .ignore()
            .expire(&set_key, secs as i64)
            .ignore()
            .zcard(&set_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| AuthError::storage(e.to_string()))?;

        Ok(active)
    }
}
