// Client side: placing term sets and images onto the service queues

use crate::error::{PiiFilterError, Result};
use crate::facts::{encode_fact, PartialFact};
use crate::ocr::ImageSubmission;
use crate::transport::MessagePublisher;
use std::path::Path;
use std::sync::Arc;

/// Publishes job inputs for the filter and OCR services
pub struct Submitter {
    publisher: Arc<dyn MessagePublisher>,
    filter_queue: String,
    ocr_queue: String,
}

impl Submitter {
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        filter_queue: impl Into<String>,
        ocr_queue: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            filter_queue: filter_queue.into(),
            ocr_queue: ocr_queue.into(),
        }
    }

    /// Id for a job when the caller does not supply one
    pub fn new_job_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Send the redaction terms of a job to the filter queue
    pub async fn submit_terms(&self, img_id: &str, terms: Vec<String>) -> Result<()> {
        if terms.is_empty() {
            return Err(PiiFilterError::Validation {
                job_id: img_id.to_string(),
                message: "at least one term is required".to_string(),
            });
        }

        let count = terms.len();
        let payload = encode_fact(&PartialFact::TermSet {
            job_id: img_id.to_string(),
            terms,
        })?;
        self.publisher.publish(&self.filter_queue, &payload).await?;

        tracing::info!("Submitted {} terms for img_id {} to {}", count, img_id, self.filter_queue);
        Ok(())
    }

    /// Send raw image bytes to the OCR queue
    pub async fn submit_image(&self, img_id: &str, image: &[u8]) -> Result<()> {
        if image.is_empty() {
            return Err(PiiFilterError::Validation {
                job_id: img_id.to_string(),
                message: "image is empty".to_string(),
            });
        }

        let payload = serde_json::to_vec(&ImageSubmission::new(img_id, image)).map_err(|e| {
            PiiFilterError::Json {
                source: e,
                context: format!("Failed to encode image submission for {}", img_id),
            }
        })?;
        self.publisher.publish(&self.ocr_queue, &payload).await?;

        tracing::info!(
            "Submitted {} byte image for img_id {} to {}",
            image.len(),
            img_id,
            self.ocr_queue
        );
        Ok(())
    }

    pub async fn submit_image_file(&self, img_id: &str, path: &Path) -> Result<()> {
        let image = tokio::fs::read(path).await.map_err(|e| PiiFilterError::Io {
            source: e,
            context: format!("Failed to read image {:?}", path),
        })?;
        self.submit_image(img_id, &image).await
    }
}
