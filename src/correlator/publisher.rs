// Downstream delivery of completed results

use crate::error::{PiiFilterError, Result};
use crate::facts::{encode_result, FilteredResult};
use crate::transport::MessagePublisher;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Sink for completed jobs
///
/// Delivery is at-least-once: the same `img_id` may be published more than
/// once, always with the same regions, so consumers dedupe by id.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    /// Failure must surface as [`PiiFilterError::PublishUnavailable`]
    async fn publish(&self, result: &FilteredResult) -> Result<()>;
}

/// Publishes results as JSON onto a named queue
pub struct QueueResultPublisher {
    publisher: Arc<dyn MessagePublisher>,
    queue: String,
    timeout: Duration,
}

impl QueueResultPublisher {
    pub fn new(publisher: Arc<dyn MessagePublisher>, queue: impl Into<String>, timeout: Duration) -> Self {
        Self {
            publisher,
            queue: queue.into(),
            timeout,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

#[async_trait]
impl ResultPublisher for QueueResultPublisher {
    async fn publish(&self, result: &FilteredResult) -> Result<()> {
        let body = encode_result(result)?;

        match tokio::time::timeout(self.timeout, self.publisher.publish(&self.queue, &body)).await {
            Ok(Ok(())) => {
                tracing::debug!("Published result for img_id {} to {}", result.job_id, self.queue);
                Ok(())
            }
            Ok(Err(e)) => Err(PiiFilterError::PublishUnavailable(format!(
                "publishing img_id {} to {}: {}",
                result.job_id, self.queue, e
            ))),
            Err(_) => Err(PiiFilterError::PublishUnavailable(format!(
                "publishing img_id {} to {} timed out after {:?}",
                result.job_id, self.queue, self.timeout
            ))),
        }
    }
}
