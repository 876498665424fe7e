//! Redis Streams-backed stream log (durable, at-least-once delivery).
//!
//! Maps [`StreamLog`] onto the stream commands:
//!
//! - `create_group` → `XGROUP CREATE <stream> <group> <id> MKSTREAM`
//! - `append`       → `XADD <stream> * <field> <value> ...`
//! - `read_group`   → `XREADGROUP GROUP <group> <consumer> COUNT n [BLOCK ms] STREAMS <stream> >`
//! - `ack`          → `XACK`
//! - `auto_claim`   → `XAUTOCLAIM <stream> <group> <consumer> <min-idle> <start> COUNT n`
//! - `stream_exists`→ `EXISTS`
//!
//! Replies are parsed from raw [`redis::Value`]s so that the entry shapes of
//! Redis 6.2 and 7.x are both accepted.
//!
//! ## Connections
//!
//! Every [`RedisStreamLog`] owns one multiplexed connection. A blocking
//! `XREADGROUP` holds that connection for the whole wait, so consumers should
//! get their own via [`RedisStreamLog::dedicated`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{RedisError, Value};
use tracing::{debug, instrument};

use pulse_core::{ConsumerIdentity, QueueError, QueueResult, ReclaimBatch, RecordId, StreamRecord};
use pulse_queue::{GroupCreation, StreamLog};

/// How long `connect` waits for the initial `PING`.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct RedisStreamLog {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl core::fmt::Debug for RedisStreamLog {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStreamLog")
            .field("addr", &self.client.get_connection_info().addr)
            .finish_non_exhaustive()
    }
}

impl RedisStreamLog {
    /// Open a connection to `redis_url` and verify it with a `PING`.
    ///
    /// Fails with [`QueueError::Connection`] if the URL is invalid or the
    /// server does not answer within [`CONNECT_TIMEOUT`].
    pub async fn connect(redis_url: impl AsRef<str>) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::connection(format!("invalid redis url: {e}")))?;
        let conn = open(&client).await?;

        debug!(addr = ?client.get_connection_info().addr, "redis stream log connected");
        Ok(Self { client, conn })
    }

    /// A second log on a fresh connection to the same server.
    pub async fn dedicated(&self) -> QueueResult<Self> {
        Ok(Self {
            client: self.client.clone(),
            conn: open(&self.client).await?,
        })
    }
}

async fn open(client: &redis::Client) -> QueueResult<MultiplexedConnection> {
    let ping = async {
        let mut conn = client.get_multiplexed_tokio_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok::<_, RedisError>(conn)
    };

    match tokio::time::timeout(CONNECT_TIMEOUT, ping).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(QueueError::connection(format!("redis ping failed: {e}"))),
        Err(_) => Err(QueueError::connection(format!(
            "redis did not answer within {CONNECT_TIMEOUT:?}"
        ))),
    }
}

#[async_trait]
impl StreamLog for RedisStreamLog {
    #[instrument(level = "debug", skip(self), fields(start = %start), err)]
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: RecordId,
    ) -> QueueResult<GroupCreation> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<Value> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg(start.to_string())
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(_) => Ok(GroupCreation::Created),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(GroupCreation::AlreadyExists),
            Err(e) => Err(command_failed("XGROUP CREATE", e)),
        }
    }

    #[instrument(level = "debug", skip(self, fields), err)]
    async fn append(&self, stream: &str, fields: &[(String, String)]) -> QueueResult<RecordId> {
        let mut conn = self.conn.clone();
        let id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg(fields)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_failed("XADD", e))?;

        id.parse()
    }

    #[instrument(level = "debug", skip(self), fields(consumer = %consumer), err)]
    async fn read_group(
        &self,
        consumer: &ConsumerIdentity,
        count: usize,
        block: Duration,
    ) -> QueueResult<Vec<StreamRecord>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(consumer.group())
            .arg(consumer.consumer())
            .arg("COUNT")
            .arg(count.max(1));
        // BLOCK 0 would wait forever; a zero block is a poll.
        if !block.is_zero() {
            cmd.arg("BLOCK").arg(block.as_millis().max(1) as u64);
        }
        cmd.arg("STREAMS").arg(consumer.stream()).arg(">");

        let mut conn = self.conn.clone();
        let reply: Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| command_failed("XREADGROUP", e))?;

        parse_read_reply(reply, consumer.stream())
    }

    #[instrument(level = "debug", skip(self, ids), fields(ids = ids.len()), err)]
    async fn ack(&self, stream: &str, group: &str, ids: &[RecordId]) -> QueueResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = ids.iter().map(RecordId::to_string).collect();
        let mut conn = self.conn.clone();
        redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(&ids)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_failed("XACK", e))
    }

    #[instrument(
        level = "debug",
        skip(self),
        fields(consumer = %consumer, min_idle_ms = min_idle.as_millis() as u64, start = %start),
        err
    )]
    async fn auto_claim(
        &self,
        consumer: &ConsumerIdentity,
        min_idle: Duration,
        start: RecordId,
        count: usize,
    ) -> QueueResult<ReclaimBatch> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(consumer.stream())
            .arg(consumer.group())
            .arg(consumer.consumer())
            .arg(min_idle.as_millis() as u64)
            .arg(start.to_string())
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| command_failed("XAUTOCLAIM", e))?;

        parse_autoclaim_reply(reply)
    }

    #[instrument(level = "debug", skip(self), err)]
    async fn stream_exists(&self, stream: &str) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let found: i64 = redis::cmd("EXISTS")
            .arg(stream)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_failed("EXISTS", e))?;
        Ok(found > 0)
    }
}

fn command_failed(command: &str, e: RedisError) -> QueueError {
    QueueError::transport(format!("{command} failed: {e}"))
}

fn malformed(what: &str) -> QueueError {
    QueueError::transport(format!("malformed redis reply: {what}"))
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

/// `XREADGROUP` reply: `nil` on timeout, else `[[stream, [entry, ...]], ...]`.
fn parse_read_reply(reply: Value, stream: &str) -> QueueResult<Vec<StreamRecord>> {
    let streams = match reply {
        Value::Nil => return Ok(Vec::new()),
        Value::Bulk(streams) => streams,
        _ => return Err(malformed("XREADGROUP reply is not an array")),
    };

    let mut records = Vec::new();
    for item in streams {
        let Value::Bulk(pair) = item else {
            return Err(malformed("XREADGROUP stream item is not an array"));
        };
        let mut pair = pair.into_iter();
        let (Some(key), Some(entries)) = (pair.next(), pair.next()) else {
            return Err(malformed("XREADGROUP stream item is too short"));
        };
        if text(&key).as_deref() != Some(stream) {
            continue;
        }
        records.extend(parse_entries(entries)?);
    }
    Ok(records)
}

/// `XAUTOCLAIM` reply: `[next-cursor, [entry, ...]]`, plus a list of deleted
/// ids on Redis 7.
fn parse_autoclaim_reply(reply: Value) -> QueueResult<ReclaimBatch> {
    let Value::Bulk(parts) = reply else {
        return Err(malformed("XAUTOCLAIM reply is not an array"));
    };
    let mut parts = parts.into_iter();
    let (Some(cursor), Some(entries)) = (parts.next(), parts.next()) else {
        return Err(malformed("XAUTOCLAIM reply is too short"));
    };

    let next_cursor = text(&cursor)
        .ok_or_else(|| malformed("XAUTOCLAIM cursor is not a string"))?
        .parse()?;

    Ok(ReclaimBatch {
        records: parse_entries(entries)?,
        next_cursor,
    })
}

/// `[[id, [field, value, ...]], ...]`. `nil` entries (deleted while pending,
/// Redis 6.2) are skipped.
fn parse_entries(entries: Value) -> QueueResult<Vec<StreamRecord>> {
    let entries = match entries {
        Value::Nil => return Ok(Vec::new()),
        Value::Bulk(entries) => entries,
        _ => return Err(malformed("entry list is not an array")),
    };

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        if let Some(record) = parse_entry(entry)? {
            records.push(record);
        }
    }
    Ok(records)
}

fn parse_entry(entry: Value) -> QueueResult<Option<StreamRecord>> {
    let parts = match entry {
        Value::Nil => return Ok(None),
        Value::Bulk(parts) => parts,
        _ => return Err(malformed("entry is not an array")),
    };

    let mut parts = parts.into_iter();
    let id = parts
        .next()
        .as_ref()
        .and_then(text)
        .ok_or_else(|| malformed("entry id is missing"))?
        .parse()?;

    let field_values = match parts.next() {
        Some(Value::Bulk(values)) => values,
        // Deleted while pending: id without fields.
        Some(Value::Nil) | None => return Ok(None),
        Some(_) => return Err(malformed("entry fields are not an array")),
    };

    let mut fields = HashMap::with_capacity(field_values.len() / 2);
    let mut invalid = Vec::new();
    for chunk in field_values.chunks(2) {
        let [key, value] = chunk else { continue };
        let Some(key) = text(key) else { continue };
        match value {
            Value::Data(bytes) => match String::from_utf8(bytes.clone()) {
                Ok(value) => {
                    fields.insert(key, value);
                }
                Err(_) => invalid.push(key),
            },
            other => {
                if let Some(value) = text(other) {
                    fields.insert(key, value);
                }
            }
        }
    }

    Ok(Some(
        invalid
            .into_iter()
            .fold(StreamRecord::new(id, fields), StreamRecord::with_invalid_field),
    ))
}
