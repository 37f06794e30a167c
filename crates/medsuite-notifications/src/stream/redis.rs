//! Redis streams backend.
//!
//! - append: `XADD <stream> MAXLEN ~ <n> * field value ...`
//! - groups: `XGROUP CREATE <stream> <group> <id> MKSTREAM` (BUSYGROUP is fine)
//! - reads: `XREADGROUP GROUP <group> <consumer> COUNT <n> [BLOCK <ms>] STREAMS <stream> >`
//! - reclaim: `XPENDING` + `XCLAIM` of entries idle past the threshold
//! - ack: `XACK`

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use deadpool_redis::redis::streams::{
    StreamClaimReply, StreamId, StreamMaxlen, StreamPendingCountReply, StreamReadOptions,
    StreamReadReply,
};
use deadpool_redis::redis::{AsyncCommands, RedisError, Value, from_redis_value};
use tracing::{debug, warn};

use super::{EventStream, StreamEntry};
use crate::error::NotificationError;

/// Event stream stored in Redis.
#[derive(Clone)]
pub struct RedisEventStream {
    pool: Pool,
    stream: String,
}

impl RedisEventStream {
    #[must_use]
    pub fn new(pool: Pool, stream: impl Into<String>) -> Self {
        Self {
            pool,
            stream: stream.into(),
        }
    }

    #[must_use]
    pub fn stream_name(&self) -> &str {
        &self.stream
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, NotificationError> {
        self.pool
            .get()
            .await
            .map_err(|e| NotificationError::Stream(format!("Redis pool error: {e}")))
    }
}

fn stream_err(e: RedisError) -> NotificationError {
    NotificationError::Stream(e.to_string())
}

#[async_trait]
impl EventStream for RedisEventStream {
    async fn append(
        &self,
        fields: &[(String, String)],
        max_len: usize,
    ) -> Result<String, NotificationError> {
        let mut conn = self.conn().await?;
        let id: String = conn
            .xadd_maxlen(&self.stream, StreamMaxlen::Approx(max_len), "*", fields)
            .await
            .map_err(stream_err)?;
        Ok(id)
    }

    async fn ensure_group(&self, group: &str, start_id: &str) -> Result<(), NotificationError> {
        let mut conn = self.conn().await?;
        let created: Result<(), RedisError> = conn
            .xgroup_create_mkstream(&self.stream, group, start_id)
            .await;

        match created {
            Ok(()) => {
                debug!(stream = %self.stream, group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(stream_err(e)),
        }
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, NotificationError> {
        let mut conn = self.conn().await?;

        let mut opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count);
        // BLOCK 0 would wait forever.
        if !block.is_zero() {
            opts = opts.block(block.as_millis() as usize);
        }

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[">"], &opts)
            .await
            .map_err(stream_err)?;

        Ok(reply
            .map(|r| {
                r.keys
                    .into_iter()
                    .flat_map(|k| k.ids)
                    .map(decode_entry)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn claim_stale(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, NotificationError> {
        let mut conn = self.conn().await?;
        let min_idle_ms = min_idle.as_millis() as usize;

        let pending: StreamPendingCountReply = conn
            .xpending_count(&self.stream, group, "-", "+", count)
            .await
            .map_err(stream_err)?;

        let stale: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms >= min_idle_ms)
            .map(|p| p.id)
            .collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let claimed: StreamClaimReply = conn
            .xclaim(&self.stream, group, consumer, min_idle_ms, &stale)
            .await
            .map_err(stream_err)?;

        debug!(
            stream = %self.stream,
            group,
            consumer,
            claimed = claimed.ids.len(),
            "Reclaimed idle entries"
        );

        Ok(claimed.ids.into_iter().map(decode_entry).collect())
    }

    async fn ack(&self, group: &str, ids: &[String]) -> Result<u64, NotificationError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let acked: u64 = conn
            .xack(&self.stream, group, ids)
            .await
            .map_err(stream_err)?;
        Ok(acked)
    }
}

/// Decodes field values to text. Non-UTF-8 bytes are replaced rather than
/// dropping the entry.
fn decode_entry(entry: StreamId) -> StreamEntry {
    let fields: HashMap<String, String> = entry
        .map
        .iter()
        .map(|(name, value)| (name.clone(), decode_value(&entry.id, name, value)))
        .collect();

    StreamEntry {
        id: entry.id,
        fields,
    }
}

fn decode_value(id: &str, name: &str, value: &Value) -> String {
    if let Ok(text) = from_redis_value::<String>(value) {
        return text;
    }
    match from_redis_value::<Vec<u8>>(value) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!(message_id = id, field = name, error = %e, "Undecodable stream field");
            String::new()
        }
    }
}
