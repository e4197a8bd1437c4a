// Supervised connection bootstrap with exponential backoff and health reporting

use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Connection state of one external dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Connecting,
    Ready,
    /// Connected once, but recent calls are failing
    Degraded,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Connecting => "connecting",
            Health::Ready => "ready",
            Health::Degraded => "degraded",
        }
    }
}

/// Shared, observable health of a named component
#[derive(Debug, Clone)]
pub struct HealthHandle {
    component: &'static str,
    tx: Arc<watch::Sender<Health>>,
}

impl HealthHandle {
    pub fn new(component: &'static str) -> Self {
        let (tx, _rx) = watch::channel(Health::Connecting);
        Self {
            component,
            tx: Arc::new(tx),
        }
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn get(&self) -> Health {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Health> {
        self.tx.subscribe()
    }

    /// Record a new state, logging only actual transitions
    pub fn set(&self, health: Health) {
        let component = self.component;
        self.tx.send_if_modified(|current| {
            if *current == health {
                return false;
            }
            match health {
                Health::Ready => tracing::info!("{} is {}", component, health.as_str()),
                _ => tracing::warn!("{} is {}", component, health.as_str()),
            }
            *current = health;
            true
        });
    }
}

/// Exponential backoff between connection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay after the `attempt`-th consecutive failure (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Retry `connect` until it succeeds or shutdown is signalled
///
/// There is no attempt limit. Returns `None` only when `shutdown` flips to
/// `true` (or its sender is dropped) before a connection is made.
pub async fn connect_supervised<T, F, Fut>(
    health: &HealthHandle,
    backoff: Backoff,
    shutdown: &mut watch::Receiver<bool>,
    mut connect: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return None;
        }

        health.set(Health::Connecting);
        match connect().await {
            Ok(connection) => {
                health.set(Health::Ready);
                return Some(connection);
            }
            Err(e) => {
                let delay = backoff.delay(attempt);
                tracing::warn!(
                    "Attempt {}: could not connect to {}: {}. Retrying in {:?}",
                    attempt + 1,
                    health.component(),
                    e,
                    delay
                );
                attempt = attempt.saturating_add(1);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            return None;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PiiFilterError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(5));
        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(4), Duration::from_secs(5));
        assert_eq!(backoff.delay(200), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retries_until_connected() {
        let health = HealthHandle::new("store");
        let (_tx, mut shutdown) = watch::channel(false);
        let attempts = AtomicU32::new(0);

        let connected = connect_supervised(
            &health,
            Backoff::new(Duration::from_millis(1), Duration::from_millis(2)),
            &mut shutdown,
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(PiiFilterError::StoreUnavailable("refused".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;

        assert_eq!(connected, Some(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(health.get(), Health::Ready);
    }

    #[tokio::test]
    async fn test_shutdown_stops_retrying() {
        let health = HealthHandle::new("broker");
        let (tx, mut shutdown) = watch::channel(false);

        let handle = tokio::spawn(async move {
            connect_supervised(
                &health,
                Backoff::new(Duration::from_secs(60), Duration::from_secs(60)),
                &mut shutdown,
                || async { Err::<(), _>(PiiFilterError::BrokerUnavailable("down".to_string())) },
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_health_transitions_are_observable() {
        let health = HealthHandle::new("store");
        let rx = health.subscribe();
        assert_eq!(*rx.borrow(), Health::Connecting);

        health.set(Health::Ready);
        assert_eq!(*rx.borrow(), Health::Ready);
        health.set(Health::Degraded);
        assert_eq!(health.get(), Health::Degraded);
    }
}
