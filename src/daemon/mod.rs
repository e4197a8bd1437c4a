// Service lifecycle: connect, consume until signalled
//
// The consumer loop recovers deliveries of expired consumers on start and
// then every `broker.recovery_interval`.

mod consumer;
mod signals;

pub use consumer::{ConsumerLoop, ConsumerStats, MessageConsumer, MessageHandler, Processed};
pub use signals::{ServiceSignal, SignalHandler};

use crate::config::Config;
use crate::correlator::{Correlator, QueueResultPublisher};
use crate::error::{PiiFilterError, Result};
use crate::ocr::{OcrWorker, TextDetector};
use crate::storage::RedisFactStore;
use crate::transport::{connect_supervised, HealthHandle, RedisBroker};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Long-running consumer of one of the service queues
pub struct Service {
    config: Config,
    broker_health: HealthHandle,
    store_health: HealthHandle,
}

impl Service {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            broker_health: HealthHandle::new("broker"),
            store_health: HealthHandle::new("store"),
        }
    }

    pub fn broker_health(&self) -> &HealthHandle {
        &self.broker_health
    }

    pub fn store_health(&self) -> &HealthHandle {
        &self.store_health
    }

    /// Correlate facts from the filter queue until SIGTERM, SIGINT or SIGHUP
    pub async fn run_filter(&self) -> Result<ConsumerStats> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = self.spawn_signal_watcher(shutdown_tx)?;

        let stats = self.run_filter_until(shutdown_rx).await;
        watcher.abort();
        stats
    }

    /// Correlate facts from the filter queue until `shutdown` becomes true
    pub async fn run_filter_until(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ConsumerStats> {
        let queues = &self.config.queues;
        let backoff = self.config.retry.backoff();

        tracing::info!("Starting filter service on {}", queues.inbound);

        let broker = match self.connect_broker(&mut shutdown).await {
            Some(broker) => Arc::new(broker),
            None => return Ok(ConsumerStats::default()),
        };

        let store_url = self.config.store.url();
        let options = self.config.store.options();
        let store = match connect_supervised(&self.store_health, backoff, &mut shutdown, || {
            RedisFactStore::connect(&store_url, options)
        })
        .await
        {
            Some(store) => Arc::new(store),
            None => return Ok(ConsumerStats::default()),
        };

        let publisher = Arc::new(QueueResultPublisher::new(
            broker.clone(),
            queues.outbound.clone(),
            self.config.publish.timeout(),
        ));
        let consumer = MessageConsumer::new(Correlator::new(store, publisher))
            .with_store_health(self.store_health.clone());

        let stats = self
            .consumer_loop(broker, &queues.inbound)
            .run(&consumer, shutdown)
            .await;

        tracing::info!("Filter service stopped");
        Ok(stats)
    }

    /// Run text detection on the OCR queue until signalled
    pub async fn run_ocr(&self, detector: Arc<dyn TextDetector>) -> Result<ConsumerStats> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = self.spawn_signal_watcher(shutdown_tx)?;

        let stats = self.run_ocr_until(detector, shutdown_rx).await;
        watcher.abort();
        stats
    }

    pub async fn run_ocr_until(
        &self,
        detector: Arc<dyn TextDetector>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ConsumerStats> {
        let queues = &self.config.queues;

        tracing::info!("Starting OCR service on {}", queues.ocr);

        let broker = match self.connect_broker(&mut shutdown).await {
            Some(broker) => Arc::new(broker),
            None => return Ok(ConsumerStats::default()),
        };

        let worker = OcrWorker::new(
            detector,
            broker.clone(),
            queues.inbound.clone(),
            self.config.publish.timeout(),
        );

        let stats = self
            .consumer_loop(broker, &queues.ocr)
            .run(&worker, shutdown)
            .await;

        tracing::info!("OCR service stopped");
        Ok(stats)
    }

    /// One line per dependency, e.g. `broker=ready store=degraded`
    pub fn health_summary(&self) -> String {
        summarize(&[&self.broker_health, &self.store_health])
    }

    async fn connect_broker(&self, shutdown: &mut watch::Receiver<bool>) -> Option<RedisBroker> {
        let url = &self.config.broker.url;
        let timeout = self.config.broker.timeout();
        let lease = self.config.broker.lease();

        connect_supervised(
            &self.broker_health,
            self.config.retry.backoff(),
            shutdown,
            || async move {
                let broker = RedisBroker::connect(url, timeout).await?;
                Ok::<_, PiiFilterError>(broker.with_lease(lease))
            },
        )
        .await
    }

    fn consumer_loop(&self, broker: Arc<RedisBroker>, queue: &str) -> ConsumerLoop {
        ConsumerLoop::new(broker, queue)
            .poll_interval(self.config.broker.poll_interval())
            .redelivery_delay(self.config.retry.redelivery_delay())
            .backoff(self.config.retry.backoff())
            .recovery_interval(self.config.broker.recovery_interval())
            .broker_health(self.broker_health.clone())
    }

    fn spawn_signal_watcher(&self, shutdown: watch::Sender<bool>) -> Result<JoinHandle<()>> {
        let mut signals = SignalHandler::new()?;
        let broker_health = self.broker_health.clone();
        let store_health = self.store_health.clone();

        Ok(tokio::spawn(async move {
            loop {
                let signal = signals.wait().await;
                if signal.should_shutdown() {
                    tracing::info!("Shutdown requested, finishing the current message");
                    let _ = shutdown.send(true);
                    break;
                }
                tracing::info!("Health: {}", summarize(&[&broker_health, &store_health]));
            }
        }))
    }
}

fn summarize(handles: &[&HealthHandle]) -> String {
    handles
        .iter()
        .map(|h| format!("{}={}", h.component(), h.get().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}
