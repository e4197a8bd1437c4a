//! Text detection collaborator
//!
//! Consumes image submissions from the OCR queue, runs a [`TextDetector`]
//! over the decoded image and publishes the detected word regions onto the
//! filter queue as a region set for the same `img_id`.

mod tesseract;

pub use tesseract::{parse_tsv, TesseractDetector};

use crate::daemon::MessageHandler;
use crate::error::{PiiFilterError, Result};
use crate::facts::{encode_fact, PartialFact, Region};
use crate::transport::{Disposition, MessagePublisher};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Finds words and their pixel boxes in an encoded image
#[async_trait]
pub trait TextDetector: Send + Sync {
    async fn detect(&self, image: &[u8]) -> Result<Vec<Region>>;
}

/// Message on the OCR queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSubmission {
    pub img_id: String,
    /// Base64 (standard alphabet) encoded image bytes
    pub image_data: String,
}

impl ImageSubmission {
    pub fn new(img_id: impl Into<String>, image: &[u8]) -> Self {
        Self {
            img_id: img_id.into(),
            image_data: STANDARD.encode(image),
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let submission: ImageSubmission = serde_json::from_slice(body)
            .map_err(|e| PiiFilterError::Decode(format!("image submission: {}", e)))?;
        if submission.img_id.is_empty() {
            return Err(PiiFilterError::Decode("image submission has an empty img_id".to_string()));
        }
        Ok(submission)
    }

    pub fn image_bytes(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.image_data.trim())
            .map_err(|e| PiiFilterError::Decode(format!("image_data for {}: {}", self.img_id, e)))
    }
}

/// Handler for the OCR queue
pub struct OcrWorker {
    detector: Arc<dyn TextDetector>,
    publisher: Arc<dyn MessagePublisher>,
    filter_queue: String,
    publish_timeout: Duration,
}

impl OcrWorker {
    pub fn new(
        detector: Arc<dyn TextDetector>,
        publisher: Arc<dyn MessagePublisher>,
        filter_queue: impl Into<String>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            detector,
            publisher,
            filter_queue: filter_queue.into(),
            publish_timeout,
        }
    }

    /// Detect text in one submission and forward its regions
    ///
    /// Returns the number of regions forwarded. An image without any text
    /// forwards nothing, since an empty region set would be refused anyway.
    pub async fn process(&self, body: &[u8]) -> Result<usize> {
        let submission = ImageSubmission::decode(body)?;
        let image = submission.image_bytes()?;

        tracing::debug!(
            "Running text detection for img_id {} ({} bytes)",
            submission.img_id,
            image.len()
        );

        let regions = self.detector.detect(&image).await?;
        if regions.is_empty() {
            tracing::info!("No text found in img_id {}", submission.img_id);
            return Ok(0);
        }

        let count = regions.len();
        let fact = PartialFact::RegionSet {
            job_id: submission.img_id,
            regions,
        };
        let payload = encode_fact(&fact)?;

        match tokio::time::timeout(
            self.publish_timeout,
            self.publisher.publish(&self.filter_queue, &payload),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(PiiFilterError::PublishUnavailable(format!(
                    "forwarding regions for img_id {}: {}",
                    fact.job_id(),
                    e
                )))
            }
            Err(_) => {
                return Err(PiiFilterError::PublishUnavailable(format!(
                    "forwarding regions for img_id {} timed out after {:?}",
                    fact.job_id(),
                    self.publish_timeout
                )))
            }
        }

        tracing::info!(
            "Forwarded {} regions for img_id {} to {}",
            count,
            fact.job_id(),
            self.filter_queue
        );
        Ok(count)
    }
}

#[async_trait]
impl MessageHandler for OcrWorker {
    async fn handle(&self, body: &[u8]) -> Disposition {
        match self.process(body).await {
            Ok(_) => Disposition::Ack,
            Err(e) if e.is_transient() => {
                tracing::warn!("Requesting redelivery of image: {}", e);
                Disposition::redeliver()
            }
            Err(e) => {
                tracing::error!("Discarding image: {}", e);
                Disposition::discard()
            }
        }
    }
}
