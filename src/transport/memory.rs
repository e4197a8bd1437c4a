// Process-local broker with the same settle semantics as the Redis broker

use super::{Delivery, Disposition, MessagePublisher, MessageSource};
use crate::error::{PiiFilterError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Queues {
    pending: HashMap<String, VecDeque<Vec<u8>>>,
    /// Unsettled deliveries keyed by (queue, consumer id), oldest first
    inflight: HashMap<(String, String), Vec<Vec<u8>>>,
    dead: HashMap<String, Vec<Vec<u8>>>,
    leases: HashMap<String, Instant>,
}

/// In-memory queues for tests and local runs
///
/// Handles made with [`MemoryBroker::consumer`] share the queues but hold
/// their own in-flight deliveries and lease, like separate instances
/// against one Redis.
#[derive(Debug)]
pub struct MemoryBroker {
    queues: Arc<Mutex<Queues>>,
    available: Arc<AtomicBool>,
    consumer_id: String,
    lease: Duration,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(Queues::default())),
            available: Arc::new(AtomicBool::new(true)),
            consumer_id: uuid::Uuid::new_v4().to_string(),
            lease: Duration::from_secs(30),
        }
    }

    /// Another consumer on the same queues
    pub fn consumer(&self) -> Self {
        Self {
            queues: self.queues.clone(),
            available: self.available.clone(),
            consumer_id: uuid::Uuid::new_v4().to_string(),
            lease: self.lease,
        }
    }

    /// How long this consumer counts as alive after its last receive or settle
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    /// Make every subsequent call fail with `BrokerUnavailable` (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Messages waiting in `queue`, next delivery first
    pub fn pending(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .pending
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages taken from `queue` by any consumer and not yet settled
    pub fn inflight(&self, queue: &str) -> Vec<Vec<u8>> {
        let queues = self.lock();
        let mut held: Vec<_> = queues
            .inflight
            .iter()
            .filter(|((q, _), _)| q == queue)
            .collect();
        held.sort_by(|a, b| a.0 .1.cmp(&b.0 .1));
        held.into_iter()
            .flat_map(|(_, bodies)| bodies.iter().cloned())
            .collect()
    }

    /// Messages from `queue` rejected without redelivery
    pub fn dead_letters(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock().dead.get(queue).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn renew_lease(&self, queues: &mut Queues) {
        queues
            .leases
            .insert(self.consumer_id.clone(), Instant::now() + self.lease);
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PiiFilterError::BrokerUnavailable(
                "memory broker switched off".to_string(),
            ))
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSource for MemoryBroker {
    async fn receive(&self, queue: &str) -> Result<Option<Delivery>> {
        self.check_available()?;
        let mut queues = self.lock();
        self.renew_lease(&mut queues);

        let body = match queues.pending.get_mut(queue).and_then(|q| q.pop_front()) {
            Some(body) => body,
            None => return Ok(None),
        };

        queues
            .inflight
            .entry((queue.to_string(), self.consumer_id.clone()))
            .or_default()
            .push(body.clone());

        Ok(Some(Delivery {
            queue: queue.to_string(),
            body,
        }))
    }

    async fn settle(&self, delivery: &Delivery, disposition: Disposition) -> Result<()> {
        self.check_available()?;
        let mut queues = self.lock();

        self.renew_lease(&mut queues);
        let held = queues
            .inflight
            .get_mut(&(delivery.queue.clone(), self.consumer_id.clone()))
            .and_then(|inflight| {
                let index = inflight.iter().position(|body| *body == delivery.body)?;
                Some(inflight.remove(index))
            });
        if held.is_none() {
            tracing::warn!("Settling a delivery not in flight on {}", delivery.queue);
        }

        match disposition {
            Disposition::Ack => {}
            Disposition::Reject { requeue: true } => queues
                .pending
                .entry(delivery.queue.clone())
                .or_default()
                .push_back(delivery.body.clone()),
            Disposition::Reject { requeue: false } => queues
                .dead
                .entry(delivery.queue.clone())
                .or_default()
                .push(delivery.body.clone()),
        }

        Ok(())
    }

    async fn recover_inflight(&self, queue: &str) -> Result<usize> {
        self.check_available()?;
        let mut queues = self.lock();
        let now = Instant::now();

        let mut expired: Vec<String> = queues
            .inflight
            .keys()
            .filter(|(q, consumer)| q == queue && *consumer != self.consumer_id)
            .filter(|(_, consumer)| {
                queues
                    .leases
                    .get(consumer)
                    .map_or(true, |deadline| *deadline <= now)
            })
            .map(|(_, consumer)| consumer.clone())
            .collect();
        expired.sort();

        let mut recovered = 0;
        for consumer in expired {
            let leftovers = queues
                .inflight
                .remove(&(queue.to_string(), consumer))
                .unwrap_or_default();
            recovered += leftovers.len();
            queues
                .pending
                .entry(queue.to_string())
                .or_default()
                .extend(leftovers);
        }
        Ok(recovered)
    }
}

#[async_trait]
impl MessagePublisher for MemoryBroker {
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()> {
        self.check_available()?;
        self.lock()
            .pending
            .entry(queue.to_string())
            .or_default()
            .push_back(body.to_vec());
        Ok(())
    }
}
