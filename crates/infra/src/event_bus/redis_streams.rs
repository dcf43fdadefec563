//! Redis Streams-backed event bus (durable, at-least-once delivery).
//!
//! ## Layout
//!
//! - **Stream per subject**: `boxoffice:events:{subject}` (e.g. `boxoffice:events:ticket:created`)
//! - **Queue groups** map to Redis consumer groups on that stream
//! - **Consumers**: each subscription is one named consumer, `{group}-{uuid}`
//! - **Dead-letter stream**: `{stream}:dlq`, for entries delivered more than
//!   `max_retries` times or that cannot be decoded
//!
//! ## Delivery
//!
//! A subscription task first reclaims entries left pending by any consumer of
//! its group for longer than `pending_timeout` (crashed worker, nack, dropped
//! delivery), then blocks on `XREADGROUP` for new entries. `ack` issues `XACK`;
//! `nack` and drop leave the entry pending so it is reclaimed later.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::Value;
use redis::aio::MultiplexedConnection;
use tokio::sync::{OnceCell, mpsc};
use tracing::{debug, error, info, instrument, warn};

use boxoffice_events::{Acknowledger, BusError, Delivery, EventBus, RawEnvelope, Subject, Subscription};

const DEFAULT_STREAM_PREFIX: &str = "boxoffice:events";
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_secs(60);
const READ_BLOCK: Duration = Duration::from_millis(500);
const READ_COUNT: usize = 16;
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
struct Settings {
    stream_prefix: String,
    max_retries: u32,
    pending_timeout: Duration,
}

impl Settings {
    fn stream_key(&self, subject: Subject) -> String {
        format!("{}:{}", self.stream_prefix, subject.as_str())
    }
}

struct Shared {
    client: redis::Client,
    /// Connection for publish/ack traffic. Subscriptions block on reads, so
    /// each gets its own.
    commands: OnceCell<MultiplexedConnection>,
    settings: Settings,
}

impl Shared {
    async fn commands(&self) -> Result<MultiplexedConnection, BusError> {
        self.commands
            .get_or_try_init(|| async {
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(connection_error)
            })
            .await
            .cloned()
    }
}

#[derive(Clone)]
pub struct RedisStreamsEventBus {
    shared: Arc<Shared>,
}

impl core::fmt::Debug for RedisStreamsEventBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStreamsEventBus")
            .field("settings", &self.shared.settings)
            .finish_non_exhaustive()
    }
}

impl RedisStreamsEventBus {
    /// Connects lazily; a bad URL is reported here, an unreachable server on
    /// first use.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, BusError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(connection_error)?;
        Ok(Self {
            shared: Arc::new(Shared {
                client,
                commands: OnceCell::new(),
                settings: Settings {
                    stream_prefix: DEFAULT_STREAM_PREFIX.to_string(),
                    max_retries: DEFAULT_MAX_RETRIES,
                    pending_timeout: DEFAULT_PENDING_TIMEOUT,
                },
            }),
        })
    }

    pub fn with_stream_prefix(self, prefix: impl Into<String>) -> Self {
        self.with_settings(|s| s.stream_prefix = prefix.into())
    }

    pub fn with_max_retries(self, max_retries: u32) -> Self {
        self.with_settings(|s| s.max_retries = max_retries.max(1))
    }

    pub fn with_pending_timeout(self, pending_timeout: Duration) -> Self {
        self.with_settings(|s| s.pending_timeout = pending_timeout)
    }

    fn with_settings(self, f: impl FnOnce(&mut Settings)) -> Self {
        let mut settings = self.shared.settings.clone();
        f(&mut settings);
        Self {
            shared: Arc::new(Shared {
                client: self.shared.client.clone(),
                commands: OnceCell::new(),
                settings,
            }),
        }
    }

    /// Create the consumer group (and the stream) if missing.
    async fn ensure_group(&self, conn: &mut MultiplexedConnection, stream: &str, group: &str) -> Result<(), BusError> {
        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(command_error("XGROUP CREATE", e)),
        }
    }
}

#[async_trait]
impl EventBus for RedisStreamsEventBus {
    #[instrument(skip(self, envelope), fields(subject = %envelope.subject(), event_id = %envelope.event_id()), err)]
    async fn publish(&self, envelope: RawEnvelope) -> Result<(), BusError> {
        let payload = envelope.to_bytes().map_err(|e| BusError::Codec(e.to_string()))?;
        let stream = self.shared.settings.stream_key(envelope.subject());
        let mut conn = self.shared.commands().await?;

        let _: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("*")
            .arg("event_id")
            .arg(envelope.event_id().to_string())
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("XADD", e))?;
        Ok(())
    }

    async fn subscribe_queue_group(&self, subject: Subject, group: &str) -> Result<Subscription, BusError> {
        let stream = self.shared.settings.stream_key(subject);
        let mut reader = self
            .shared
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(connection_error)?;
        self.ensure_group(&mut reader, &stream, group).await?;

        let consumer = Consumer {
            shared: self.shared.clone(),
            stream,
            group: group.to_string(),
            name: format!("{group}-{}", uuid::Uuid::now_v7()),
        };
        info!(%subject, group, consumer = %consumer.name, "joined stream consumer group");

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(consumer.run(reader, tx));
        Ok(Subscription::new(subject, group, rx))
    }
}

/// One subscription's read loop.
struct Consumer {
    shared: Arc<Shared>,
    stream: String,
    group: String,
    name: String,
}

struct StreamEntry {
    id: String,
    fields: HashMap<String, String>,
}

impl Consumer {
    async fn run(self, mut conn: MultiplexedConnection, tx: mpsc::UnboundedSender<Delivery>) {
        while !tx.is_closed() {
            let batch = match self.poll(&mut conn).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(stream = %self.stream, group = %self.group, error = %e, "stream read failed");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                    continue;
                }
            };

            for (entry, attempt) in batch {
                if let Some(delivery) = self.to_delivery(&mut conn, entry, attempt).await {
                    if let Err(unsent) = tx.send(delivery) {
                        // Left pending; another member reclaims it.
                        let _ = unsent.0.disarm();
                        return;
                    }
                }
            }
        }
        debug!(consumer = %self.name, "subscription dropped; consumer stopping");
    }

    /// Reclaimed idle entries first, then new ones.
    async fn poll(&self, conn: &mut MultiplexedConnection) -> Result<Vec<(StreamEntry, u32)>, BusError> {
        let reclaimed = self.reclaim_idle(conn).await?;
        if !reclaimed.is_empty() {
            return Ok(reclaimed);
        }

        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.name)
            .arg("COUNT")
            .arg(READ_COUNT)
            .arg("BLOCK")
            .arg(READ_BLOCK.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(">")
            .query_async(conn)
            .await
            .map_err(|e| command_error("XREADGROUP", e))?;

        let entries = match reply {
            Value::Nil => Vec::new(),
            Value::Bulk(streams) => streams
                .into_iter()
                .filter_map(|s| match s {
                    Value::Bulk(mut pair) if pair.len() == 2 => pair.pop(),
                    _ => None,
                })
                .flat_map(bulk)
                .collect(),
            other => return Err(BusError::Codec(format!("unexpected XREADGROUP reply: {other:?}"))),
        };

        Ok(entries.iter().filter_map(parse_entry).map(|e| (e, 1)).collect())
    }

    /// Claim entries any member of the group has held longer than the pending timeout.
    async fn reclaim_idle(&self, conn: &mut MultiplexedConnection) -> Result<Vec<(StreamEntry, u32)>, BusError> {
        let idle_ms = self.shared.settings.pending_timeout.as_millis() as u64;
        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("IDLE")
            .arg(idle_ms)
            .arg("-")
            .arg("+")
            .arg(READ_COUNT)
            .query_async(conn)
            .await
            .map_err(|e| command_error("XPENDING", e))?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let deliveries: HashMap<String, u64> = pending.iter().map(|(id, _, _, n)| (id.clone(), *n)).collect();
        let ids: Vec<&str> = pending.iter().map(|(id, ..)| id.as_str()).collect();

        let claimed: Value = redis::cmd("XCLAIM")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&self.name)
            .arg(idle_ms)
            .arg(&ids)
            .query_async(conn)
            .await
            .map_err(|e| command_error("XCLAIM", e))?;

        Ok(bulk(claimed)
            .iter()
            .filter_map(parse_entry)
            .map(|entry| {
                let previous = deliveries.get(&entry.id).copied().unwrap_or(0);
                let attempt = u32::try_from(previous + 1).unwrap_or(u32::MAX);
                (entry, attempt)
            })
            .collect())
    }

    /// Turn an entry into a delivery, dead-lettering it instead when it is
    /// undecodable or has exhausted its retries.
    async fn to_delivery(&self, conn: &mut MultiplexedConnection, entry: StreamEntry, attempt: u32) -> Option<Delivery> {
        let decoded = entry
            .fields
            .get("payload")
            .ok_or_else(|| "missing payload field".to_string())
            .and_then(|p| RawEnvelope::from_bytes(p.as_bytes()).map_err(|e| e.to_string()));

        let reason = match decoded {
            Ok(envelope) if attempt <= self.shared.settings.max_retries => {
                let acker = StreamAcker {
                    shared: self.shared.clone(),
                    stream: self.stream.clone(),
                    group: self.group.clone(),
                    entry_id: entry.id,
                };
                return Some(Delivery::new(envelope, attempt, Box::new(acker)));
            }
            Ok(_) => format!("exceeded {} deliveries", self.shared.settings.max_retries),
            Err(e) => format!("undecodable entry: {e}"),
        };

        if let Err(e) = self.dead_letter(conn, &entry, attempt, &reason).await {
            error!(entry_id = %entry.id, error = %e, "failed to dead-letter entry; it stays pending");
        }
        None
    }

    async fn dead_letter(
        &self,
        conn: &mut MultiplexedConnection,
        entry: &StreamEntry,
        attempt: u32,
        reason: &str,
    ) -> Result<(), BusError> {
        let dlq = format!("{}:dlq", self.stream);
        let payload = entry.fields.get("payload").map(String::as_str).unwrap_or_default();

        let _: String = redis::cmd("XADD")
            .arg(&dlq)
            .arg("*")
            .arg("original_id")
            .arg(&entry.id)
            .arg("group")
            .arg(&self.group)
            .arg("attempts")
            .arg(attempt)
            .arg("reason")
            .arg(reason)
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("payload")
            .arg(payload)
            .query_async(conn)
            .await
            .map_err(|e| command_error("XADD (dlq)", e))?;

        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&entry.id)
            .query_async(conn)
            .await
            .map_err(|e| command_error("XACK", e))?;

        warn!(entry_id = %entry.id, group = %self.group, attempt, reason, "entry moved to dead-letter stream");
        Ok(())
    }
}

struct StreamAcker {
    shared: Arc<Shared>,
    stream: String,
    group: String,
    entry_id: String,
}

#[async_trait]
impl Acknowledger for StreamAcker {
    async fn ack(&self) -> Result<(), BusError> {
        let mut conn = self.shared.commands().await?;
        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&self.entry_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("XACK", e))?;
        Ok(())
    }

    async fn nack(&self) -> Result<(), BusError> {
        debug!(entry_id = %self.entry_id, "entry left pending for reclaim");
        Ok(())
    }
}

fn bulk(value: Value) -> Vec<Value> {
    match value {
        Value::Bulk(items) => items,
        _ => Vec::new(),
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

/// `[id, [field, value, ...]]`. Entries deleted while pending come back as nil.
fn parse_entry(value: &Value) -> Option<StreamEntry> {
    let Value::Bulk(parts) = value else {
        return None;
    };
    let id = text(parts.first()?)?;
    let Value::Bulk(raw_fields) = parts.get(1)? else {
        return None;
    };

    let fields = raw_fields
        .chunks_exact(2)
        .filter_map(|kv| Some((text(&kv[0])?, text(&kv[1])?)))
        .collect();
    Some(StreamEntry { id, fields })
}

fn connection_error(e: redis::RedisError) -> BusError {
    BusError::Connection(e.to_string())
}

fn command_error(command: &str, e: redis::RedisError) -> BusError {
    BusError::Command(format!("{command} failed: {e}"))
}
