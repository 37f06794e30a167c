use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{EventStream, StreamEntry};
use crate::error::NotificationError;

/// In-process stream with consumer-group semantics.
///
/// Ids have the form `{seq}-0`. Trimming is exact, which satisfies the
/// approximate cap contract.
#[derive(Debug, Default)]
pub struct MemoryEventStream {
    state: Mutex<State>,
    appended: Notify,
}

#[derive(Debug, Default)]
struct State {
    last_seq: u64,
    entries: VecDeque<(u64, HashMap<String, String>)>,
    groups: HashMap<String, Group>,
}

#[derive(Debug)]
struct Group {
    last_delivered: u64,
    pending: BTreeMap<u64, Pending>,
}

#[derive(Debug)]
struct Pending {
    consumer: String,
    delivered_at: Instant,
}

impl MemoryEventStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending entry count for `group`.
    #[must_use]
    pub fn pending(&self, group: &str) -> usize {
        self.lock()
            .ok()
            .and_then(|s| s.groups.get(group).map(|g| g.pending.len()))
            .unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, NotificationError> {
        self.state
            .lock()
            .map_err(|_| NotificationError::Internal("stream state poisoned".into()))
    }

    fn take_new(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, NotificationError> {
        let mut state = self.lock()?;
        let State {
            entries, groups, ..
        } = &mut *state;
        let group = groups
            .get_mut(group)
            .ok_or_else(|| NotificationError::Stream(format!("NOGROUP no such group '{group}'")))?;

        let now = Instant::now();
        let mut out = Vec::new();
        for (seq, fields) in entries.iter() {
            if out.len() >= count {
                break;
            }
            if *seq <= group.last_delivered {
                continue;
            }
            group.last_delivered = *seq;
            group.pending.insert(
                *seq,
                Pending {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                },
            );
            out.push(StreamEntry {
                id: format_id(*seq),
                fields: fields.clone(),
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl EventStream for MemoryEventStream {
    async fn append(
        &self,
        fields: &[(String, String)],
        max_len: usize,
    ) -> Result<String, NotificationError> {
        let id = {
            let mut state = self.lock()?;
            state.last_seq += 1;
            let seq = state.last_seq;
            state
                .entries
                .push_back((seq, fields.iter().cloned().collect()));
            while state.entries.len() > max_len.max(1) {
                state.entries.pop_front();
            }
            format_id(seq)
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn ensure_group(&self, group: &str, start_id: &str) -> Result<(), NotificationError> {
        let mut state = self.lock()?;
        let last_delivered = if start_id == "$" {
            state.last_seq
        } else {
            parse_id(start_id)?
        };
        state.groups.entry(group.to_string()).or_insert(Group {
            last_delivered,
            pending: BTreeMap::new(),
        });
        Ok(())
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, NotificationError> {
        let notified = self.appended.notified();
        let entries = self.take_new(group, consumer, count)?;
        if !entries.is_empty() || block.is_zero() {
            return Ok(entries);
        }
        let _ = tokio::time::timeout(block, notified).await;
        self.take_new(group, consumer, count)
    }

    async fn claim_stale(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, NotificationError> {
        let mut state = self.lock()?;
        let State {
            entries, groups, ..
        } = &mut *state;
        let group = groups
            .get_mut(group)
            .ok_or_else(|| NotificationError::Stream(format!("NOGROUP no such group '{group}'")))?;

        let now = Instant::now();
        let stale: Vec<u64> = group
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.delivered_at) >= min_idle)
            .map(|(seq, _)| *seq)
            .take(count)
            .collect();

        let mut out = Vec::new();
        for seq in stale {
            match entries.iter().find(|(s, _)| *s == seq) {
                Some((_, fields)) => {
                    group.pending.insert(
                        seq,
                        Pending {
                            consumer: consumer.to_string(),
                            delivered_at: now,
                        },
                    );
                    out.push(StreamEntry {
                        id: format_id(seq),
                        fields: fields.clone(),
                    });
                }
                // Trimmed while pending.
                None => {
                    group.pending.remove(&seq);
                }
            }
        }
        Ok(out)
    }

    async fn ack(&self, group: &str, ids: &[String]) -> Result<u64, NotificationError> {
        let mut state = self.lock()?;
        let Some(group) = state.groups.get_mut(group) else {
            return Ok(0);
        };
        let mut acked = 0;
        for id in ids {
            if group.pending.remove(&parse_id(id)?).is_some() {
                acked += 1;
            }
        }
        Ok(acked)
    }
}

fn format_id(seq: u64) -> String {
    format!("{seq}-0")
}

fn parse_id(id: &str) -> Result<u64, NotificationError> {
    id.split('-')
        .next()
        .and_then(|ms| ms.parse().ok())
        .ok_or_else(|| NotificationError::Stream(format!("invalid stream id '{id}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(n: usize) -> Vec<(String, String)> {
        vec![("n".to_string(), n.to_string())]
    }

    #[tokio::test]
    async fn test_n_claims_then_zero_after_ack() {
        let stream = MemoryEventStream::new();
        for n in 0..5 {
            stream.append(&fields(n), 100).await.unwrap();
        }
        stream.ensure_group("g", "0").await.unwrap();

        let first = stream.read_group("g", "c1", 100, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 5);
        assert_eq!(stream.pending("g"), 5);

        let ids: Vec<String> = first.iter().map(|e| e.id.clone()).collect();
        assert_eq!(stream.ack("g", &ids).await.unwrap(), 5);

        let second = stream.read_group("g", "c1", 100, Duration::ZERO).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(stream.pending("g"), 0);
    }

    #[tokio::test]
    async fn test_ids_increase_and_trim() {
        let stream = MemoryEventStream::new();
        let a = stream.append(&fields(1), 2).await.unwrap();
        let b = stream.append(&fields(2), 2).await.unwrap();
        let _ = stream.append(&fields(3), 2).await.unwrap();
        assert!(parse_id(&b).unwrap() > parse_id(&a).unwrap());
        assert_eq!(stream.len(), 2);
    }

    #[tokio::test]
    async fn test_group_from_tail_sees_only_new() {
        let stream = MemoryEventStream::new();
        stream.append(&fields(1), 10).await.unwrap();
        stream.ensure_group("g", "$").await.unwrap();
        stream.append(&fields(2), 10).await.unwrap();

        let entries = stream.read_group("g", "c", 10, Duration::ZERO).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field("n"), Some("2"));
    }

    #[tokio::test]
    async fn test_consumers_split_work() {
        let stream = MemoryEventStream::new();
        stream.ensure_group("g", "0").await.unwrap();
        for n in 0..4 {
            stream.append(&fields(n), 10).await.unwrap();
        }

        let a = stream.read_group("g", "a", 2, Duration::ZERO).await.unwrap();
        let b = stream.read_group("g", "b", 10, Duration::ZERO).await.unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 2);
        assert_ne!(a[0].id, b[0].id);
    }

    #[tokio::test]
    async fn test_unacked_entries_are_reclaimable() {
        let stream = MemoryEventStream::new();
        stream.ensure_group("g", "0").await.unwrap();
        stream.append(&fields(1), 10).await.unwrap();

        let first = stream.read_group("g", "a", 10, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);

        let none = stream
            .claim_stale("g", "b", Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert!(none.is_empty());

        let reclaimed = stream.claim_stale("g", "b", Duration::ZERO, 10).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, first[0].id);
    }

    #[tokio::test]
    async fn test_read_without_group_fails() {
        let stream = MemoryEventStream::new();
        let err = stream.read_group("missing", "c", 1, Duration::ZERO).await;
        assert!(matches!(err, Err(NotificationError::Stream(_))));
    }

    #[tokio::test]
    async fn test_blocking_read_wakes_on_append() {
        let stream = std::sync::Arc::new(MemoryEventStream::new());
        stream.ensure_group("g", "$").await.unwrap();

        let writer = stream.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append(&fields(9), 10).await.unwrap();
        });

        let entries = stream
            .read_group("g", "c", 10, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }
}
