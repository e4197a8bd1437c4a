// Redis-backed partial fact store

use super::{fact_key, PartialFactStore};
use crate::error::{PiiFilterError, Result};
use crate::facts::FactKind;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Per-call behaviour of the Redis store
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Expiry applied to every stored record; `None` keeps records until deleted
    pub ttl: Option<Duration>,
    /// Upper bound on a single store round-trip
    pub timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            ttl: None,
            timeout: Duration::from_secs(5),
        }
    }
}

/// [`PartialFactStore`] over a Redis connection manager
#[derive(Clone)]
pub struct RedisFactStore {
    conn: ConnectionManager,
    options: StoreOptions,
}

impl fmt::Debug for RedisFactStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisFactStore")
            .field("connection", &"ConnectionManager")
            .field("options", &self.options)
            .finish()
    }
}

impl RedisFactStore {
    /// Single connection attempt; supervision lives in `transport::connect_supervised`
    pub async fn connect(url: &str, options: StoreOptions) -> Result<Self> {
        tracing::debug!("Connecting to fact store at {}", url);

        let client = redis::Client::open(url).map_err(|e| {
            PiiFilterError::Config(format!("Invalid store url {}: {}", url, e))
        })?;

        let conn = tokio::time::timeout(options.timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                PiiFilterError::StoreUnavailable(format!(
                    "connecting to {} timed out after {:?}",
                    url, options.timeout
                ))
            })?
            .map_err(|e| {
                PiiFilterError::StoreUnavailable(format!("connecting to {} failed: {}", url, e))
            })?;

        Ok(Self::from_connection(conn, options))
    }

    pub fn from_connection(conn: ConnectionManager, options: StoreOptions) -> Self {
        Self { conn, options }
    }

    /// Round-trip check used by readiness checks
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        self.bounded("PING", async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
        .map(|_| ())
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.options.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(PiiFilterError::StoreUnavailable(format!(
                "{} failed: {}",
                op, e
            ))),
            Err(_) => Err(PiiFilterError::StoreUnavailable(format!(
                "{} timed out after {:?}",
                op, self.options.timeout
            ))),
        }
    }
}

#[async_trait]
impl PartialFactStore for RedisFactStore {
    async fn put(&self, job_id: &str, kind: FactKind, payload: &str) -> Result<()> {
        let key = fact_key(job_id, kind);
        let mut conn = self.conn.clone();

        match self.options.ttl {
            Some(ttl) => {
                // SET EX rejects zero
                let seconds = ttl.as_secs().max(1);
                self.bounded("SETEX", async {
                    conn.set_ex::<_, _, ()>(&key, payload, seconds).await
                })
                .await?;
            }
            None => {
                self.bounded("SET", async { conn.set::<_, _, ()>(&key, payload).await })
                    .await?;
            }
        }

        tracing::debug!("Stored {} for img_id {} in Redis", kind, job_id);
        Ok(())
    }

    async fn get(&self, job_id: &str, kind: FactKind) -> Result<Option<String>> {
        let key = fact_key(job_id, kind);
        let mut conn = self.conn.clone();

        let payload = self
            .bounded("GET", async { conn.get::<_, Option<String>>(&key).await })
            .await?;

        tracing::debug!(
            "Store GET {}: {}",
            key,
            if payload.is_some() { "hit" } else { "miss" }
        );
        Ok(payload)
    }

    async fn delete_job(&self, job_id: &str) -> Result<()> {
        let keys: Vec<String> = FactKind::all()
            .iter()
            .map(|kind| fact_key(job_id, *kind))
            .collect();
        let mut conn = self.conn.clone();

        self.bounded("DEL", async { conn.del::<_, ()>(&keys).await })
            .await?;

        tracing::debug!("Deleted data for img_id {} from Redis", job_id);
        Ok(())
    }
}
