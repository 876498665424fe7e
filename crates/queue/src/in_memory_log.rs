//! In-memory stream log for tests/dev.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use pulse_core::{
    ConsumerIdentity, QueueError, QueueResult, ReclaimBatch, RecordId, StreamRecord,
};

use crate::log::{GroupCreation, StreamLog};

/// In-memory stream log with Redis Streams semantics.
///
/// - Redis-style `<ms>-<seq>` ids, strictly increasing per stream
/// - Per-group cursor and Pending Entries List
/// - Idle time measured on the tokio clock, so tests can pause/advance it
/// - `auto_claim` pages through the PEL like `XAUTOCLAIM`
///
/// The internal lock is never held across an `.await`.
#[derive(Debug, Default)]
pub struct InMemoryStreamLog {
    state: Mutex<LogState>,
    appended: Notify,
}

#[derive(Debug, Default)]
struct LogState {
    streams: HashMap<String, StreamState>,
}

#[derive(Debug, Default)]
struct StreamState {
    records: BTreeMap<RecordId, HashMap<String, String>>,
    last_id: RecordId,
    groups: HashMap<String, GroupState>,
}

#[derive(Debug)]
struct GroupState {
    last_delivered: RecordId,
    pending: BTreeMap<RecordId, PendingEntry>,
}

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

/// Snapshot of one pending entry (the `XPENDING` view).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub id: RecordId,
    pub consumer: String,
    pub idle: Duration,
    pub delivery_count: u64,
}

impl InMemoryStreamLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pending entries of a group in id order.
    pub fn pending(&self, stream: &str, group: &str) -> QueueResult<Vec<PendingInfo>> {
        let state = self.lock()?;
        let now = Instant::now();

        let Some(group) = state.streams.get(stream).and_then(|s| s.groups.get(group)) else {
            return Ok(Vec::new());
        };

        Ok(group
            .pending
            .iter()
            .map(|(id, entry)| PendingInfo {
                id: *id,
                consumer: entry.consumer.clone(),
                idle: now.saturating_duration_since(entry.delivered_at),
                delivery_count: entry.delivery_count,
            })
            .collect())
    }

    /// Remove records from a stream (`XDEL`). Pending entries are left behind
    /// and get dropped the next time a reclaim scan reaches them.
    pub fn delete(&self, stream: &str, ids: &[RecordId]) -> QueueResult<u64> {
        let mut state = self.lock()?;
        let Some(stream) = state.streams.get_mut(stream) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| stream.records.remove(id).is_some()).count() as u64)
    }

    /// Number of records currently held by `stream`.
    pub fn len(&self, stream: &str) -> QueueResult<usize> {
        let state = self.lock()?;
        Ok(state.streams.get(stream).map_or(0, |s| s.records.len()))
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, LogState>> {
        self.state
            .lock()
            .map_err(|_| QueueError::transport("in-memory log lock poisoned"))
    }

    /// Hand out up to `count` undelivered records; never waits.
    fn deliver(&self, consumer: &ConsumerIdentity, count: usize) -> QueueResult<Vec<StreamRecord>> {
        let mut guard = self.lock()?;
        let stream = guard
            .streams
            .get_mut(consumer.stream())
            .ok_or_else(|| no_group(consumer))?;
        let group = stream
            .groups
            .get_mut(consumer.group())
            .ok_or_else(|| no_group(consumer))?;

        let now = Instant::now();
        let mut delivered = Vec::new();

        for (id, fields) in stream
            .records
            .range(group.last_delivered.successor()..)
            .take(count.max(1))
        {
            group.pending.insert(
                *id,
                PendingEntry {
                    consumer: consumer.consumer().to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            delivered.push(StreamRecord::new(*id, fields.clone()));
        }

        if let Some(last) = delivered.last() {
            group.last_delivered = last.id;
        }

        Ok(delivered)
    }
}

fn no_group(consumer: &ConsumerIdentity) -> QueueError {
    QueueError::transport(format!(
        "NOGROUP no such key '{}' or consumer group '{}'",
        consumer.stream(),
        consumer.group()
    ))
}

fn next_id(last: RecordId) -> RecordId {
    let now_ms = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
    if now_ms > last.millis() {
        RecordId::new(now_ms, 0)
    } else {
        last.successor()
    }
}

#[async_trait]
impl StreamLog for InMemoryStreamLog {
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: RecordId,
    ) -> QueueResult<GroupCreation> {
        let mut state = self.lock()?;
        let stream = state.streams.entry(stream.to_string()).or_default();

        if stream.groups.contains_key(group) {
            return Ok(GroupCreation::AlreadyExists);
        }

        stream.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered: start,
                pending: BTreeMap::new(),
            },
        );
        Ok(GroupCreation::Created)
    }

    async fn append(&self, stream: &str, fields: &[(String, String)]) -> QueueResult<RecordId> {
        if fields.is_empty() {
            return Err(QueueError::transport(
                "ERR wrong number of arguments for 'xadd' command",
            ));
        }

        let id = {
            let mut state = self.lock()?;
            let stream = state.streams.entry(stream.to_string()).or_default();
            let id = next_id(stream.last_id);
            stream.last_id = id;
            stream.records.insert(id, fields.iter().cloned().collect());
            id
        };

        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read_group(
        &self,
        consumer: &ConsumerIdentity,
        count: usize,
        block: Duration,
    ) -> QueueResult<Vec<StreamRecord>> {
        let deadline = Instant::now().checked_add(block);

        loop {
            // Register for wakeups before looking, so an append between the
            // check and the wait is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let delivered = self.deliver(consumer, count)?;
            if !delivered.is_empty() || block.is_zero() {
                return Ok(delivered);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(Vec::new());
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[RecordId]) -> QueueResult<u64> {
        let mut state = self.lock()?;
        let Some(group) = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        else {
            return Ok(0);
        };

        Ok(ids
            .iter()
            .filter(|id| group.pending.remove(id).is_some())
            .count() as u64)
    }

    async fn auto_claim(
        &self,
        consumer: &ConsumerIdentity,
        min_idle: Duration,
        start: RecordId,
        count: usize,
    ) -> QueueResult<ReclaimBatch> {
        let mut guard = self.lock()?;
        let stream = guard
            .streams
            .get_mut(consumer.stream())
            .ok_or_else(|| no_group(consumer))?;
        let group = stream
            .groups
            .get_mut(consumer.group())
            .ok_or_else(|| no_group(consumer))?;

        let now = Instant::now();
        let count = count.max(1);
        let mut records = Vec::new();
        let mut vanished = Vec::new();
        let mut next_cursor = RecordId::ZERO;

        for (id, entry) in group.pending.range_mut(start..) {
            if records.len() == count {
                next_cursor = *id;
                break;
            }

            // Deleted from the stream while pending.
            let Some(fields) = stream.records.get(id) else {
                vanished.push(*id);
                continue;
            };

            if now.saturating_duration_since(entry.delivered_at) < min_idle {
                continue;
            }

            entry.consumer = consumer.consumer().to_string();
            entry.delivered_at = now;
            entry.delivery_count += 1;
            records.push(StreamRecord::new(*id, fields.clone()));
        }

        for id in vanished {
            group.pending.remove(&id);
        }

        Ok(ReclaimBatch {
            records,
            next_cursor,
        })
    }

    async fn stream_exists(&self, stream: &str) -> QueueResult<bool> {
        Ok(self.lock()?.streams.contains_key(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(body: &str) -> Vec<(String, String)> {
        vec![("payload".to_string(), body.to_string())]
    }

    async fn log_with_group(stream: &str, group: &str) -> InMemoryStreamLog {
        let log = InMemoryStreamLog::new();
        log.create_group(stream, group, RecordId::ZERO).await.unwrap();
        log
    }

    #[tokio::test]
    async fn group_creation_is_idempotent_and_makes_the_stream() {
        let log = InMemoryStreamLog::new();
        assert!(!log.stream_exists("s").await.unwrap());

        assert_eq!(
            log.create_group("s", "g", RecordId::ZERO).await.unwrap(),
            GroupCreation::Created
        );
        assert_eq!(
            log.create_group("s", "g", RecordId::ZERO).await.unwrap(),
            GroupCreation::AlreadyExists
        );
        assert!(log.stream_exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn ids_are_strictly_increasing() {
        let log = InMemoryStreamLog::new();
        let mut last = RecordId::ZERO;
        for i in 0..50 {
            let id = log.append("s", &fields(&i.to_string())).await.unwrap();
            assert!(id > last, "{id} should follow {last}");
            last = id;
        }
    }

    #[tokio::test]
    async fn append_rejects_empty_records() {
        let log = InMemoryStreamLog::new();
        assert!(matches!(log.append("s", &[]).await, Err(QueueError::Transport(_))));
    }

    #[tokio::test]
    async fn new_records_go_to_exactly_one_consumer() {
        let log = log_with_group("s", "g").await;
        let a = ConsumerIdentity::new("s", "g", "a");
        let b = ConsumerIdentity::new("s", "g", "b");

        let id = log.append("s", &fields("{}")).await.unwrap();

        let got_a = log.read_group(&a, 1, Duration::ZERO).await.unwrap();
        let got_b = log.read_group(&b, 1, Duration::ZERO).await.unwrap();

        assert_eq!(got_a.len(), 1);
        assert_eq!(got_a[0].id, id);
        assert!(got_b.is_empty());

        let pending = log.pending("s", "g").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].consumer, "a");
        assert_eq!(pending[0].delivery_count, 1);
    }

    #[tokio::test]
    async fn reading_without_a_group_fails() {
        let log = InMemoryStreamLog::new();
        let c = ConsumerIdentity::new("s", "missing", "c");
        let err = log.read_group(&c, 1, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, QueueError::Transport(msg) if msg.starts_with("NOGROUP")));
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_read_times_out_empty() {
        let log = log_with_group("s", "g").await;
        let c = ConsumerIdentity::new("s", "g", "c");

        let started = Instant::now();
        let got = log.read_group(&c, 1, Duration::from_secs(2)).await.unwrap();

        assert!(got.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn blocking_read_wakes_on_append() {
        let log = std::sync::Arc::new(log_with_group("s", "g").await);
        let c = ConsumerIdentity::new("s", "g", "c");

        let reader = {
            let log = log.clone();
            tokio::spawn(async move { log.read_group(&c, 1, Duration::from_secs(30)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = log.append("s", &fields("{}")).await.unwrap();

        let got = reader.await.unwrap().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, id);
    }

    #[tokio::test]
    async fn ack_counts_only_pending_entries() {
        let log = log_with_group("s", "g").await;
        let c = ConsumerIdentity::new("s", "g", "c");
        let id = log.append("s", &fields("{}")).await.unwrap();
        log.read_group(&c, 1, Duration::ZERO).await.unwrap();

        assert_eq!(log.ack("s", "g", &[id]).await.unwrap(), 1);
        assert_eq!(log.ack("s", "g", &[id]).await.unwrap(), 0);
        assert_eq!(log.ack("s", "nope", &[id]).await.unwrap(), 0);
        assert!(log.pending("s", "g").unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_claim_respects_min_idle_and_reassigns() {
        let log = log_with_group("s", "g").await;
        let a = ConsumerIdentity::new("s", "g", "a");
        let b = ConsumerIdentity::new("s", "g", "b");
        let id = log.append("s", &fields("{}")).await.unwrap();
        log.read_group(&a, 1, Duration::ZERO).await.unwrap();

        let early = log
            .auto_claim(&b, Duration::from_secs(60), RecordId::ZERO, 10)
            .await
            .unwrap();
        assert!(early.records.is_empty());
        assert!(early.is_exhausted());

        tokio::time::advance(Duration::from_secs(61)).await;

        let late = log
            .auto_claim(&b, Duration::from_secs(60), RecordId::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(late.records.len(), 1);
        assert_eq!(late.records[0].id, id);

        let pending = log.pending("s", "g").unwrap();
        assert_eq!(pending[0].consumer, "b");
        assert_eq!(pending[0].delivery_count, 2);
        assert_eq!(pending[0].idle, Duration::ZERO);
    }

    #[tokio::test]
    async fn auto_claim_pages_with_a_cursor() {
        let log = log_with_group("s", "g").await;
        let c = ConsumerIdentity::new("s", "g", "c");
        for i in 0..5 {
            log.append("s", &fields(&i.to_string())).await.unwrap();
        }
        log.read_group(&c, 5, Duration::ZERO).await.unwrap();

        let first = log.auto_claim(&c, Duration::ZERO, RecordId::ZERO, 2).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert!(!first.is_exhausted());
        assert!(first.next_cursor > first.records[1].id);

        let second = log.auto_claim(&c, Duration::ZERO, first.next_cursor, 2).await.unwrap();
        let third = log.auto_claim(&c, Duration::ZERO, second.next_cursor, 2).await.unwrap();
        assert_eq!(second.records.len(), 2);
        assert_eq!(third.records.len(), 1);
        assert!(third.is_exhausted());
    }

    #[tokio::test]
    async fn auto_claim_drops_entries_whose_record_was_deleted() {
        let log = log_with_group("s", "g").await;
        let c = ConsumerIdentity::new("s", "g", "c");
        let gone = log.append("s", &fields("1")).await.unwrap();
        let kept = log.append("s", &fields("2")).await.unwrap();
        log.read_group(&c, 2, Duration::ZERO).await.unwrap();

        assert_eq!(log.delete("s", &[gone]).unwrap(), 1);

        let batch = log.auto_claim(&c, Duration::ZERO, RecordId::ZERO, 10).await.unwrap();
        assert_eq!(batch.records.iter().map(|r| r.id).collect::<Vec<_>>(), [kept]);

        let pending: Vec<_> = log.pending("s", "g").unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(pending, [kept]);
    }
}
