//! Durable, bounded, multi-consumer event log.
//!
//! Entries are flat field maps appended to a single named stream. Consumers
//! read through named groups: each new entry goes to one consumer of the
//! group and stays pending until acknowledged. Pending entries idle for too
//! long can be reclaimed by another consumer, which gives at-least-once
//! delivery.
//!
//! Two backends:
//! - [`RedisEventStream`]: Redis streams (XADD / XREADGROUP / XACK)
//! - [`MemoryEventStream`]: single-process implementation with the same semantics

mod memory;
mod redis;

pub use self::memory::MemoryEventStream;
pub use self::redis::RedisEventStream;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::NotificationError;

/// Default stream shared by all services.
pub const DEFAULT_STREAM: &str = "healthcare_events";

/// Default approximate cap on stream length.
pub const DEFAULT_MAX_LEN: usize = 100_000;

/// One entry as read from the stream, fields already decoded to text.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Stream operations used by the publisher and the consumer.
#[async_trait]
pub trait EventStream: Send + Sync {
    /// Appends an entry and trims the stream to roughly `max_len` entries.
    async fn append(
        &self,
        fields: &[(String, String)],
        max_len: usize,
    ) -> Result<String, NotificationError>;

    /// Creates the consumer group (and the stream) if missing.
    ///
    /// `start_id` is `0` to deliver existing entries or `$` for new ones only.
    async fn ensure_group(&self, group: &str, start_id: &str) -> Result<(), NotificationError>;

    /// Reads up to `count` never-delivered entries for `consumer`, waiting up
    /// to `block` when none are available. A zero `block` does not wait.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, NotificationError>;

    /// Transfers entries pending longer than `min_idle` to `consumer`.
    async fn claim_stale(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, NotificationError>;

    /// Acknowledges entries; returns how many were pending.
    async fn ack(&self, group: &str, ids: &[String]) -> Result<u64, NotificationError>;
}
