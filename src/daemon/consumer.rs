// Single-flight queue consumption
//
// Per message: Received -> Decoded -> Delegated -> {Acked | Rejected}.
// One message is settled before the next is taken; throughput comes from
// running more instances against the same queue and store. A delivery whose
// settle failed is held and settled again before anything new is taken.

use crate::correlator::{Correlator, Outcome};
use crate::error::{PiiFilterError, Result};
use crate::facts::decode_fact;
use crate::transport::{Backoff, Delivery, Disposition, Health, HealthHandle, MessageSource};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Turns one message body into a settle decision
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> Disposition;
}

/// What happened to one filter-queue message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub disposition: Disposition,
    /// Present when the message reached the correlator and it returned
    pub outcome: Option<Outcome>,
}

/// Handler for the filter queue: decodes facts and feeds the correlator
pub struct MessageConsumer {
    correlator: Correlator,
    store_health: Option<HealthHandle>,
}

impl MessageConsumer {
    pub fn new(correlator: Correlator) -> Self {
        Self {
            correlator,
            store_health: None,
        }
    }

    /// Report store reachability observed while processing
    pub fn with_store_health(mut self, health: HealthHandle) -> Self {
        self.store_health = Some(health);
        self
    }

    /// Decode, delegate and decide how to settle one message
    ///
    /// Decode failures are dead-lettered: malformed input never becomes
    /// well-formed. Transport outages ask for redelivery. Every correlator
    /// outcome, including a rejected fact, is acknowledged.
    pub async fn process(&self, body: &[u8]) -> Processed {
        let fact = match decode_fact(body) {
            Ok(fact) => fact,
            Err(e) => {
                tracing::warn!("Discarding message: {}", e);
                return Processed {
                    disposition: Disposition::discard(),
                    outcome: None,
                };
            }
        };

        let job_id = fact.job_id().to_string();
        tracing::debug!("Processing message for img_id: {}", job_id);

        match self.correlator.on_fact(fact).await {
            Ok(outcome) => {
                self.mark_store(Health::Ready);
                if let Outcome::Rejected(reason) = &outcome {
                    tracing::warn!("Acknowledging rejected fact for img_id {}: {}", job_id, reason);
                }
                Processed {
                    disposition: Disposition::Ack,
                    outcome: Some(outcome),
                }
            }
            Err(e) if e.is_transient() => {
                if matches!(e, PiiFilterError::StoreUnavailable(_)) {
                    self.mark_store(Health::Degraded);
                }
                tracing::warn!("Requesting redelivery for img_id {}: {}", job_id, e);
                Processed {
                    disposition: Disposition::redeliver(),
                    outcome: None,
                }
            }
            Err(e) => {
                tracing::error!("Error processing message for img_id {}: {}", job_id, e);
                Processed {
                    disposition: Disposition::discard(),
                    outcome: None,
                }
            }
        }
    }

    fn mark_store(&self, health: Health) {
        if let Some(handle) = &self.store_health {
            handle.set(health);
        }
    }
}

#[async_trait]
impl MessageHandler for MessageConsumer {
    async fn handle(&self, body: &[u8]) -> Disposition {
        self.process(body).await.disposition
    }
}

/// Counters reported when a consumer loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acked: u64,
    pub discarded: u64,
    pub requeued: u64,
    pub broker_errors: u64,
}

impl ConsumerStats {
    fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Ack => self.acked += 1,
            Disposition::Reject { requeue: true } => self.requeued += 1,
            Disposition::Reject { requeue: false } => self.discarded += 1,
        }
    }
}

/// Pulls messages from one queue and settles each before taking the next
pub struct ConsumerLoop {
    source: Arc<dyn MessageSource>,
    queue: String,
    poll_interval: Duration,
    redelivery_delay: Duration,
    backoff: Backoff,
    recovery_interval: Duration,
    broker_health: Option<HealthHandle>,
    unsettled: Mutex<Option<(Delivery, Disposition)>>,
}

impl ConsumerLoop {
    pub fn new(source: Arc<dyn MessageSource>, queue: impl Into<String>) -> Self {
        Self {
            source,
            queue: queue.into(),
            poll_interval: Duration::from_millis(250),
            redelivery_delay: Duration::from_secs(1),
            backoff: Backoff::new(Duration::from_millis(500), Duration::from_secs(30)),
            recovery_interval: Duration::from_secs(30),
            broker_health: None,
            unsettled: Mutex::new(None),
        }
    }

    /// Sleep between polls of an empty queue
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Pause after requesting a redelivery so an outage does not spin
    pub fn redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    /// Spacing of retries while the broker itself is failing
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// How often `run` returns deliveries of expired consumers to the queue
    pub fn recovery_interval(mut self, interval: Duration) -> Self {
        self.recovery_interval = interval;
        self
    }

    pub fn broker_health(mut self, health: HealthHandle) -> Self {
        self.broker_health = Some(health);
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Take, handle and settle at most one message
    ///
    /// `Ok(None)` means the queue was empty. If settling fails after the
    /// handler ran, the delivery is kept and the next call settles it with
    /// the same disposition instead of taking a new message. The handler
    /// never runs twice for it.
    pub async fn poll_once<H>(&self, handler: &H) -> Result<Option<Disposition>>
    where
        H: MessageHandler + ?Sized,
    {
        if let Some((delivery, disposition)) = self.take_unsettled() {
            return self.settle(delivery, disposition).await.map(Some);
        }

        let delivery = match self.source.receive(&self.queue).await? {
            Some(delivery) => delivery,
            None => return Ok(None),
        };

        let disposition = handler.handle(&delivery.body).await;
        self.settle(delivery, disposition).await.map(Some)
    }

    /// True while a handled delivery is waiting to be settled
    pub fn has_unsettled(&self) -> bool {
        self.lock_unsettled().is_some()
    }

    /// Return deliveries of expired consumers to the queue, logging failures
    pub async fn recover(&self) -> usize {
        match self.source.recover_inflight(&self.queue).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("Could not recover unsettled messages on {}: {}", self.queue, e);
                0
            }
        }
    }

    async fn settle(&self, delivery: Delivery, disposition: Disposition) -> Result<Disposition> {
        match self.source.settle(&delivery, disposition).await {
            Ok(()) => Ok(disposition),
            Err(e) => {
                tracing::warn!(
                    "Holding a handled message from {} until it can be settled",
                    self.queue
                );
                *self.lock_unsettled() = Some((delivery, disposition));
                Err(e)
            }
        }
    }

    fn take_unsettled(&self) -> Option<(Delivery, Disposition)> {
        self.lock_unsettled().take()
    }

    fn lock_unsettled(&self) -> MutexGuard<'_, Option<(Delivery, Disposition)>> {
        self.unsettled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Consume until `shutdown` becomes true
    ///
    /// Shutdown is only observed between messages, never while one is being
    /// handled.
    pub async fn run<H>(&self, handler: &H, mut shutdown: watch::Receiver<bool>) -> ConsumerStats
    where
        H: MessageHandler + ?Sized,
    {
        let mut stats = ConsumerStats::default();
        let mut broker_failures: u32 = 0;
        let mut next_recovery = Instant::now();

        tracing::info!("Service is running and listening for messages on {}", self.queue);

        loop {
            if *shutdown.borrow() {
                break;
            }

            if Instant::now() >= next_recovery {
                self.recover().await;
                next_recovery = Instant::now() + self.recovery_interval;
            }

            let pause = match self.poll_once(handler).await {
                Ok(Some(disposition)) => {
                    self.mark_broker(Health::Ready);
                    broker_failures = 0;
                    stats.record(disposition);
                    match disposition {
                        Disposition::Reject { requeue: true } => Some(self.redelivery_delay),
                        _ => None,
                    }
                }
                Ok(None) => {
                    self.mark_broker(Health::Ready);
                    broker_failures = 0;
                    Some(self.poll_interval)
                }
                Err(e) => {
                    self.mark_broker(Health::Degraded);
                    stats.broker_errors += 1;
                    let delay = self.backoff.delay(broker_failures);
                    broker_failures = broker_failures.saturating_add(1);
                    tracing::warn!("Broker error on {}: {}. Retrying in {:?}", self.queue, e, delay);
                    Some(delay)
                }
            };

            if let Some(delay) = pause {
                if wait_or_shutdown(delay, &mut shutdown).await {
                    break;
                }
            }
        }

        if self.has_unsettled() {
            tracing::warn!(
                "Stopping with an unsettled message on {}; it is recovered once this consumer's lease expires",
                self.queue
            );
        }

        tracing::info!(
            "Consumer on {} finished: {} acked, {} discarded, {} requeued, {} broker errors",
            self.queue,
            stats.acked,
            stats.discarded,
            stats.requeued,
            stats.broker_errors
        );
        stats
    }

    fn mark_broker(&self, health: Health) {
        if let Some(handle) = &self.broker_health {
            handle.set(health);
        }
    }
}

/// Sleep for `delay`; true if shutdown was requested meanwhile
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
