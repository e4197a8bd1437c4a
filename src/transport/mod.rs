//! Queue transport
//!
//! Consumers see a queue as a source of [`Delivery`] values that must each be
//! settled with a [`Disposition`]. Two implementations share those semantics:
//! [`RedisBroker`] over Redis lists and the process-local [`MemoryBroker`].

mod memory;
mod redis_queue;
mod supervisor;

pub use memory::MemoryBroker;
pub use redis_queue::{QueueDepths, RedisBroker};
pub use supervisor::{connect_supervised, Backoff, Health, HealthHandle};

use crate::error::Result;
use async_trait::async_trait;

/// One message taken from a queue, not yet settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub queue: String,
    pub body: Vec<u8>,
}

/// Final decision for a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Consumed; never delivered again
    Ack,
    /// Refused; `requeue` hands it back for redelivery, otherwise it is dead-lettered
    Reject { requeue: bool },
}

impl Disposition {
    pub fn discard() -> Self {
        Disposition::Reject { requeue: false }
    }

    pub fn redeliver() -> Self {
        Disposition::Reject { requeue: true }
    }
}

/// Receiving side of a durable queue
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Take the next message, or `None` if the queue is currently empty
    async fn receive(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Settle a delivery previously returned by `receive`
    async fn settle(&self, delivery: &Delivery, disposition: Disposition) -> Result<()>;

    /// Return deliveries held by consumers whose lease has expired to `queue`
    ///
    /// Deliveries of live consumers, this one included, are left alone.
    async fn recover_inflight(&self, queue: &str) -> Result<usize>;
}

/// Sending side of a durable queue
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()>;
}

/// List holding the deliveries one consumer took but has not yet settled
pub fn processing_queue(queue: &str, consumer: &str) -> String {
    format!("{}:processing:{}", queue, consumer)
}

/// Set of consumer ids that have taken deliveries from `queue`
pub fn consumer_set(queue: &str) -> String {
    format!("{}:consumers", queue)
}

/// Key that exists while `consumer` is alive
pub fn lease_key(queue: &str, consumer: &str) -> String {
    format!("{}:lease:{}", queue, consumer)
}

/// List holding deliveries rejected without redelivery
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{}:dead", queue)
}
