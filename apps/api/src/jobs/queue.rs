//! Redis Stream used as the job queue.
//!
//! Jobs are appended with XADD and read through a consumer group. An entry stays
//! pending until the worker acknowledges it, so a job whose worker dies mid-run is
//! claimed by another worker once it has been idle for `CLAIM_IDLE`.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::jobs::Envelope;

const STREAM_KEY: &str = "explainer:jobs";
const CONSUMER_GROUP: &str = "explainer:workers";
const PAYLOAD_FIELD: &str = "job";
const READ_BLOCK: Duration = Duration::from_secs(5);
/// How long a delivered entry may stay unacknowledged before another worker takes it.
const CLAIM_IDLE: Duration = Duration::from_secs(600);
const CLAIM_BATCH: usize = 10;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("stream entry {0} has no job payload")]
    MissingPayload(String),
}

/// A job read from the stream together with the entry id that acknowledges it.
#[derive(Debug)]
pub struct Delivery {
    pub entry_id: String,
    pub envelope: Envelope,
}

/// Producer side. Cheap to clone; all clones share one reconnecting connection.
#[derive(Clone)]
pub struct JobQueue {
    client: redis::Client,
    conn: ConnectionManager,
}

impl JobQueue {
    /// Connects and creates the consumer group if it does not exist yet.
    pub async fn connect(client: redis::Client) -> Result<Self, QueueError> {
        let conn = client.get_connection_manager().await?;
        let queue = Self { client, conn };
        queue.ensure_group().await?;
        Ok(queue)
    }

    async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(STREAM_KEY)
            .arg(CONSUMER_GROUP)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => info!("Created consumer group {CONSUMER_GROUP}"),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group {CONSUMER_GROUP} already exists");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    pub async fn enqueue(&self, envelope: Envelope) -> Result<String, QueueError> {
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.conn.clone();
        let entry_id: String = redis::cmd("XADD")
            .arg(STREAM_KEY)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        debug!(
            "Enqueued job {} ({}) as entry {entry_id}",
            envelope.id,
            envelope.job.name()
        );
        Ok(entry_id)
    }

    /// Opens a consumer on its own connection. Blocking reads would otherwise hold
    /// up every enqueue sharing the producer connection.
    pub async fn consumer(&self) -> Result<Consumer, QueueError> {
        Ok(Consumer {
            conn: self.client.get_connection_manager().await?,
            name: format!("worker-{}", Uuid::new_v4()),
        })
    }
}

/// Consumer side, owned by one worker loop.
pub struct Consumer {
    conn: ConnectionManager,
    name: String,
}

impl Consumer {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits up to `READ_BLOCK` for the next new entry.
    pub async fn read(&mut self) -> Result<Vec<Delivery>, QueueError> {
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(CONSUMER_GROUP)
            .arg(&self.name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(READ_BLOCK.as_millis() as u64)
            .arg("STREAMS")
            .arg(STREAM_KEY)
            .arg(">")
            .query_async(&mut self.conn)
            .await?;

        let entries = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();
        Ok(self.decode_all(entries).await)
    }

    /// Takes over entries that another consumer received but never acknowledged.
    pub async fn claim_stale(&mut self) -> Result<Vec<Delivery>, QueueError> {
        let idle_ms = CLAIM_IDLE.as_millis() as u64;
        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(STREAM_KEY)
            .arg(CONSUMER_GROUP)
            .arg("IDLE")
            .arg(idle_ms)
            .arg("-")
            .arg("+")
            .arg(CLAIM_BATCH)
            .query_async(&mut self.conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut claim = redis::cmd("XCLAIM");
        claim
            .arg(STREAM_KEY)
            .arg(CONSUMER_GROUP)
            .arg(&self.name)
            .arg(idle_ms);
        for entry in &pending.ids {
            claim.arg(&entry.id);
        }
        let claimed: StreamClaimReply = claim.query_async(&mut self.conn).await?;

        if !claimed.ids.is_empty() {
            info!("Claimed {} stale job(s)", claimed.ids.len());
        }
        Ok(self.decode_all(claimed.ids).await)
    }

    /// Marks an entry done and removes it from the stream.
    pub async fn ack(&mut self, entry_id: &str) -> Result<(), QueueError> {
        redis::cmd("XACK")
            .arg(STREAM_KEY)
            .arg(CONSUMER_GROUP)
            .arg(entry_id)
            .query_async::<_, ()>(&mut self.conn)
            .await?;
        redis::cmd("XDEL")
            .arg(STREAM_KEY)
            .arg(entry_id)
            .query_async::<_, ()>(&mut self.conn)
            .await?;
        Ok(())
    }

    /// Malformed entries are acknowledged and dropped so they are not redelivered.
    async fn decode_all(&mut self, entries: Vec<StreamId>) -> Vec<Delivery> {
        let mut deliveries = Vec::with_capacity(entries.len());
        for entry in entries {
            match decode_entry(&entry) {
                Ok(envelope) => deliveries.push(Delivery {
                    entry_id: entry.id,
                    envelope,
                }),
                Err(e) => {
                    warn!("Discarding job entry {}: {e}", entry.id);
                    if let Err(e) = self.ack(&entry.id).await {
                        warn!("Could not discard entry {}: {e}", entry.id);
                    }
                }
            }
        }
        deliveries
    }
}

fn decode_entry(entry: &StreamId) -> Result<Envelope, QueueError> {
    let payload: String = entry
        .get(PAYLOAD_FIELD)
        .ok_or_else(|| QueueError::MissingPayload(entry.id.clone()))?;
    decode_payload(&payload)
}

fn decode_payload(payload: &str) -> Result<Envelope, QueueError> {
    Ok(serde_json::from_str(payload)?)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::jobs::Job;

    #[test]
    fn test_decode_payload_round_trips_an_envelope() {
        let envelope = Envelope::new(Job::SelectDiagrams {
            session_id: Uuid::nil(),
        });
        let payload = serde_json::to_string(&envelope).unwrap();
        assert_eq!(decode_payload(&payload).unwrap(), envelope);
    }

    #[test]
    fn test_decode_payload_rejects_garbage() {
        assert!(matches!(
            decode_payload("{\"kind\":\"unknown\"}"),
            Err(QueueError::Payload(_))
        ));
    }

    #[test]
    fn test_entry_without_job_field_is_reported() {
        let entry = StreamId {
            id: "1-0".to_string(),
            map: HashMap::new(),
        };
        assert!(matches!(
            decode_entry(&entry),
            Err(QueueError::MissingPayload(id)) if id == "1-0"
        ));
    }
}
