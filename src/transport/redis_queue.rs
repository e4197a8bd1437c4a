// Reliable queue over Redis lists
//
// Producers LPUSH onto `<queue>`. A consumer LMOVEs the oldest entry onto
// its own `<queue>:processing:<id>`, so a crash between receive and settle
// leaves the message recoverable instead of lost. Every receive and settle
// renews `<queue>:lease:<id>`; only lists whose lease has expired are
// recovered, so instances never take each other's in-flight work.

use super::{
    consumer_set, dead_letter_queue, lease_key, processing_queue, Delivery, Disposition,
    MessagePublisher, MessageSource,
};
use crate::error::{PiiFilterError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::RedisResult;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Queue lengths reported by `piifilter status`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepths {
    pub pending: usize,
    pub processing: usize,
    pub dead: usize,
}

/// Message broker backed by Redis lists
#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
    timeout: Duration,
    consumer_id: String,
    lease: Duration,
}

impl fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBroker")
            .field("connection", &"ConnectionManager")
            .field("timeout", &self.timeout)
            .field("consumer_id", &self.consumer_id)
            .field("lease", &self.lease)
            .finish()
    }
}

impl RedisBroker {
    /// Single connection attempt; wrap in `connect_supervised` to retry
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        tracing::debug!("Connecting to broker at {}", url);

        let client = redis::Client::open(url).map_err(|e| {
            PiiFilterError::Config(format!("Invalid broker url {}: {}", url, e))
        })?;

        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                PiiFilterError::BrokerUnavailable(format!(
                    "connecting to {} timed out after {:?}",
                    url, timeout
                ))
            })?
            .map_err(|e| {
                PiiFilterError::BrokerUnavailable(format!("connecting to {} failed: {}", url, e))
            })?;

        Ok(Self {
            conn,
            timeout,
            consumer_id: uuid::Uuid::new_v4().to_string(),
            lease: Duration::from_secs(300),
        })
    }

    /// How long this consumer counts as alive after its last receive or settle
    ///
    /// Must exceed the longest time a handler can hold one delivery.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        self.bounded("PING", async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
        .map(|_| ())
    }

    /// Queue lengths; `processing` counts every consumer's list, expired or not
    pub async fn depths(&self, queue: &str) -> Result<QueueDepths> {
        let consumers = self.consumers(queue).await?;

        let mut pipe = redis::pipe();
        pipe.cmd("LLEN").arg(queue).cmd("LLEN").arg(dead_letter_queue(queue));
        for consumer in &consumers {
            pipe.cmd("LLEN").arg(processing_queue(queue, consumer));
        }

        let mut conn = self.conn.clone();
        let lengths = self
            .bounded("LLEN", async { pipe.query_async::<Vec<usize>>(&mut conn).await })
            .await?;

        Ok(QueueDepths {
            pending: lengths.first().copied().unwrap_or(0),
            processing: lengths.iter().skip(2).sum(),
            dead: lengths.get(1).copied().unwrap_or(0),
        })
    }

    async fn consumers(&self, queue: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        self.bounded("SMEMBERS", async {
            redis::cmd("SMEMBERS")
                .arg(consumer_set(queue))
                .query_async::<Vec<String>>(&mut conn)
                .await
        })
        .await
    }

    fn lease_secs(&self) -> u64 {
        self.lease.as_secs().max(1)
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(PiiFilterError::BrokerUnavailable(format!(
                "{} failed: {}",
                op, e
            ))),
            Err(_) => Err(PiiFilterError::BrokerUnavailable(format!(
                "{} timed out after {:?}",
                op, self.timeout
            ))),
        }
    }
}

#[async_trait]
impl MessageSource for RedisBroker {
    async fn receive(&self, queue: &str) -> Result<Option<Delivery>> {
        let processing = processing_queue(queue, &self.consumer_id);
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.cmd("SET")
            .arg(lease_key(queue, &self.consumer_id))
            .arg(1)
            .arg("EX")
            .arg(self.lease_secs())
            .ignore()
            .cmd("SADD")
            .arg(consumer_set(queue))
            .arg(&self.consumer_id)
            .ignore()
            .cmd("LMOVE")
            .arg(queue)
            .arg(&processing)
            .arg("RIGHT")
            .arg("LEFT");

        let (body,) = self
            .bounded("LMOVE", async {
                pipe.query_async::<(Option<Vec<u8>>,)>(&mut conn).await
            })
            .await?;

        Ok(body.map(|body| Delivery {
            queue: queue.to_string(),
            body,
        }))
    }

    async fn settle(&self, delivery: &Delivery, disposition: Disposition) -> Result<()> {
        let processing = processing_queue(&delivery.queue, &self.consumer_id);
        let body = delivery.body.as_slice();
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(lease_key(&delivery.queue, &self.consumer_id))
            .arg(1)
            .arg("EX")
            .arg(self.lease_secs())
            .ignore()
            .cmd("LREM")
            .arg(&processing)
            .arg(1)
            .arg(body)
            .ignore();

        match disposition {
            Disposition::Ack => {}
            Disposition::Reject { requeue: true } => {
                pipe.cmd("LPUSH").arg(&delivery.queue).arg(body).ignore();
            }
            Disposition::Reject { requeue: false } => {
                pipe.cmd("LPUSH")
                    .arg(dead_letter_queue(&delivery.queue))
                    .arg(body)
                    .ignore();
            }
        }

        self.bounded("settle", async { pipe.query_async::<()>(&mut conn).await })
            .await
    }

    async fn recover_inflight(&self, queue: &str) -> Result<usize> {
        let mut recovered = 0;

        for consumer in self.consumers(queue).await? {
            if consumer == self.consumer_id {
                continue;
            }

            let mut conn = self.conn.clone();
            let alive = self
                .bounded("EXISTS", async {
                    redis::cmd("EXISTS")
                        .arg(lease_key(queue, &consumer))
                        .query_async::<bool>(&mut conn)
                        .await
                })
                .await?;
            if alive {
                continue;
            }

            // Oldest first onto the back of the queue, behind waiting messages
            let processing = processing_queue(queue, &consumer);
            let mut moved = 0;
            loop {
                let mut conn = self.conn.clone();
                let body = self
                    .bounded("LMOVE", async {
                        redis::cmd("LMOVE")
                            .arg(&processing)
                            .arg(queue)
                            .arg("RIGHT")
                            .arg("LEFT")
                            .query_async::<Option<Vec<u8>>>(&mut conn)
                            .await
                    })
                    .await?;
                match body {
                    Some(_) => moved += 1,
                    None => break,
                }
            }

            let mut conn = self.conn.clone();
            self.bounded("SREM", async {
                redis::cmd("SREM")
                    .arg(consumer_set(queue))
                    .arg(&consumer)
                    .query_async::<()>(&mut conn)
                    .await
            })
            .await?;

            if moved > 0 {
                tracing::warn!(
                    "Recovered {} unsettled messages onto {} from expired consumer {}",
                    moved,
                    queue,
                    consumer
                );
            }
            recovered += moved;
        }

        Ok(recovered)
    }
}

#[async_trait]
impl MessagePublisher for RedisBroker {
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        self.bounded("LPUSH", async {
            redis::cmd("LPUSH")
                .arg(queue)
                .arg(body)
                .query_async::<()>(&mut conn)
                .await
        })
        .await
    }
}
