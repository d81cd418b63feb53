//! Redis Streams-backed work queue.
//!
//! - **Queue address**: the stream key
//! - **Consumer group**: one per deployment; every poller process joins it
//!   under its own consumer name, so each message goes to one process
//! - **Receipt handle**: the stream entry id
//! - **Visibility timeout**: entries pending longer than the timeout are
//!   taken over with `XAUTOCLAIM` on the next receive
//! - **Receive count**: the group's delivery counter for the entry
//!
//! Deleting acknowledges the entry and removes it from the stream.
//!
//! A group that disappears (key deleted, server restarted without
//! persistence) is created again on the next receive.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use redis::Value;
use redis::aio::MultiplexedConnection;
use tracing::{debug, instrument, warn};

use watchstore_events::{MessageId, QueueClient, QueueError, QueueMessage, ReceiveOptions};

/// Stream entry field that carries the message body.
const BODY_FIELD: &str = "body";

#[derive(Debug)]
pub struct RedisStreamsQueue {
    client: redis::Client,
    group: String,
    consumer: String,
    visibility_timeout: Duration,
    known_groups: Mutex<HashSet<String>>,
}

impl RedisStreamsQueue {
    /// * `redis_url` - e.g. "redis://localhost:6379"
    /// * `group` - consumer group shared by all workers
    /// * `consumer` - name unique to this process within the group
    pub fn new(
        redis_url: impl AsRef<str>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        visibility_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            group: group.into(),
            consumer: consumer.into(),
            visibility_timeout,
            known_groups: Mutex::new(HashSet::new()),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))
    }

    fn known_groups(&self) -> MutexGuard<'_, HashSet<String>> {
        self.known_groups.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create the consumer group (and the stream) once per stream.
    async fn ensure_group(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
    ) -> Result<(), QueueError> {
        if self.known_groups().contains(stream) {
            return Ok(());
        }

        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match created {
            Ok(()) => debug!(stream, group = %self.group, "consumer group created"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(QueueError::Command(format!("XGROUP CREATE failed: {e}"))),
        }

        self.known_groups().insert(stream.to_string());
        Ok(())
    }

    /// Wrap a failed command. `NOGROUP` forgets the stream's group so the
    /// next receive creates it again.
    fn command_failed(&self, stream: &str, command: &str, err: redis::RedisError) -> QueueError {
        if err.code() == Some("NOGROUP") && self.known_groups().remove(stream) {
            warn!(
                stream,
                group = %self.group,
                "consumer group missing; recreating on next receive"
            );
        }
        QueueError::Command(format!("{command} failed: {err}"))
    }

    /// Take over entries another delivery left pending for too long.
    async fn claim_stale(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
        count: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.visibility_timeout.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(conn)
            .await
            .map_err(|e| self.command_failed(stream, "XAUTOCLAIM", e))?;

        let entries = match reply {
            Value::Bulk(mut parts) if parts.len() >= 2 => parts.swap_remove(1),
            other => {
                return Err(QueueError::Deserialization(format!(
                    "unexpected XAUTOCLAIM reply: {other:?}"
                )));
            }
        };

        let mut messages = Vec::new();
        for (id, body) in parse_entries(entries)? {
            let receive_count = self.delivery_count(conn, stream, &id).await?;
            messages.push(QueueMessage {
                message_id: id.clone(),
                body,
                receipt_handle: id,
                receive_count,
            });
        }
        Ok(messages)
    }

    async fn delivery_count(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
        id: &str,
    ) -> Result<u32, QueueError> {
        let reply: Value = redis::cmd("XPENDING")
            .arg(stream)
            .arg(&self.group)
            .arg(id)
            .arg(id)
            .arg(1)
            .query_async(conn)
            .await
            .map_err(|e| self.command_failed(stream, "XPENDING", e))?;

        parse_delivery_count(&reply)
    }

    async fn read_new(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
        count: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(count);
        // BLOCK 0 would wait forever.
        let block_ms = wait.as_millis() as u64;
        if block_ms > 0 {
            cmd.arg("BLOCK").arg(block_ms);
        }
        cmd.arg("STREAMS").arg(stream).arg(">");

        let reply: Value = cmd
            .query_async(conn)
            .await
            .map_err(|e| self.command_failed(stream, "XREADGROUP", e))?;

        let entries = parse_read_reply(reply, stream)?;
        Ok(entries
            .into_iter()
            .map(|(id, body)| QueueMessage {
                message_id: id.clone(),
                body,
                receipt_handle: id,
                receive_count: 1,
            })
            .collect())
    }
}

#[async_trait]
impl QueueClient for RedisStreamsQueue {
    #[instrument(skip(self, body), err)]
    async fn send(&self, queue: &str, body: String) -> Result<MessageId, QueueError> {
        let mut conn = self.connection().await?;
        let id: String = redis::cmd("XADD")
            .arg(queue)
            .arg("*")
            .arg(BODY_FIELD)
            .arg(body)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XADD failed: {e}")))?;
        Ok(id)
    }

    async fn receive(
        &self,
        queue: &str,
        options: ReceiveOptions,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        if options.max_messages == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.connection().await?;
        self.ensure_group(&mut conn, queue).await?;

        let claimed = self
            .claim_stale(&mut conn, queue, options.max_messages)
            .await?;
        if !claimed.is_empty() {
            return Ok(claimed);
        }

        self.read_new(&mut conn, queue, options.max_messages, options.wait_time)
            .await
    }

    async fn delete(&self, queue: &str, receipt_handle: &str) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;

        let acked: i64 = redis::cmd("XACK")
            .arg(queue)
            .arg(&self.group)
            .arg(receipt_handle)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.command_failed(queue, "XACK", e))?;
        if acked == 0 {
            return Err(QueueError::ReceiptNotFound {
                queue: queue.to_string(),
                receipt_handle: receipt_handle.to_string(),
            });
        }

        let _: i64 = redis::cmd("XDEL")
            .arg(queue)
            .arg(receipt_handle)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XDEL failed: {e}")))?;
        Ok(())
    }
}

/// Extended `XPENDING` reply for one id: `[[id, consumer, idle_ms, deliveries]]`.
fn parse_delivery_count(reply: &Value) -> Result<u32, QueueError> {
    let Value::Bulk(entries) = reply else {
        return Err(QueueError::Deserialization(format!(
            "unexpected XPENDING reply: {reply:?}"
        )));
    };
    // Acknowledged in the meantime; treat as a first delivery.
    let Some(Value::Bulk(fields)) = entries.first() else {
        return Ok(1);
    };
    let deliveries: u64 = fields
        .get(3)
        .map(redis::from_redis_value::<u64>)
        .transpose()
        .map_err(|e| QueueError::Deserialization(format!("invalid delivery count: {e}")))?
        .unwrap_or(1);
    Ok(u32::try_from(deliveries).unwrap_or(u32::MAX))
}

/// `XREADGROUP` reply: nil on timeout, otherwise `[[stream, [entry, ...]], ...]`.
fn parse_read_reply(reply: Value, stream: &str) -> Result<Vec<(String, String)>, QueueError> {
    let streams = match reply {
        Value::Nil => return Ok(Vec::new()),
        Value::Bulk(streams) => streams,
        other => {
            return Err(QueueError::Deserialization(format!(
                "unexpected XREADGROUP reply: {other:?}"
            )));
        }
    };

    let mut out = Vec::new();
    for item in streams {
        let Value::Bulk(mut pair) = item else {
            return Err(QueueError::Deserialization("invalid stream reply".to_string()));
        };
        if pair.len() != 2 {
            return Err(QueueError::Deserialization("invalid stream reply".to_string()));
        }
        let entries = pair.pop().unwrap_or(Value::Nil);
        let name: String = redis::from_redis_value(&pair[0])
            .map_err(|e| QueueError::Deserialization(e.to_string()))?;
        if name == stream {
            out.extend(parse_entries(entries)?);
        }
    }
    Ok(out)
}

/// Stream entries: `[[id, [field, value, ...]], ...]`. Nil entries (deleted
/// while pending) are skipped.
fn parse_entries(entries: Value) -> Result<Vec<(String, String)>, QueueError> {
    let entries = match entries {
        Value::Nil => return Ok(Vec::new()),
        Value::Bulk(entries) => entries,
        other => {
            return Err(QueueError::Deserialization(format!(
                "unexpected stream entries: {other:?}"
            )));
        }
    };

    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let parts = match entry {
            Value::Nil => continue,
            Value::Bulk(parts) if parts.len() == 2 => parts,
            other => {
                return Err(QueueError::Deserialization(format!(
                    "invalid stream entry: {other:?}"
                )));
            }
        };

        let id: String = redis::from_redis_value(&parts[0])
            .map_err(|e| QueueError::Deserialization(format!("invalid entry id: {e}")))?;
        let Value::Bulk(fields) = &parts[1] else {
            return Err(QueueError::Deserialization(format!(
                "invalid fields for entry {id}"
            )));
        };

        let mut body = None;
        for pair in fields.chunks_exact(2) {
            let key: String = redis::from_redis_value(&pair[0])
                .map_err(|e| QueueError::Deserialization(format!("invalid field name: {e}")))?;
            if key == BODY_FIELD {
                body = Some(
                    redis::from_redis_value::<String>(&pair[1])
                        .map_err(|e| QueueError::Deserialization(format!("invalid body: {e}")))?,
                );
            }
        }

        // An entry without a body still flows through dispatch, which rejects
        // it as malformed and leaves it to the dead-letter policy.
        let body = body.unwrap_or_else(|| {
            warn!(entry_id = %id, "stream entry has no body field");
            String::new()
        });
        out.push((id, body));
    }
    Ok(out)
}
