//! Join engine for partial facts
//!
//! Protocol per fact: validate, persist, look up the complementary record, and
//! on completeness filter, publish, then delete both records. A fact is always
//! durably stored before completeness is decided, so a crash never loses one.
//!
//! There is no lock around store-then-lookup. Two facts for the same job that
//! arrive concurrently can both observe completeness and both publish. The
//! filtered regions are a pure function of the two stored collections, so the
//! duplicate is identical and downstream dedupes by `img_id`.

mod publisher;

pub use publisher::{QueueResultPublisher, ResultPublisher};

use crate::error::Result;
use crate::facts::{FactKind, FilteredResult, PartialFact, Region};
use crate::filtering::RedactionFilter;
use crate::storage::{get_record, put_record, PartialFactStore};
use std::fmt;
use std::sync::Arc;

/// Result of handing one fact to the correlator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Fact persisted, job still waiting for its complement
    Stored { job_id: String, kind: FactKind },
    /// Both facts present; result published and records deleted
    Completed(FilteredResult),
    /// Fact refused without touching the store
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Empty `img_id`, empty collection or an inverted region
    Invalid(String),
    /// Neither a region set nor a term set
    UnknownKind,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Invalid(message) => write!(f, "invalid: {}", message),
            RejectReason::UnknownKind => f.write_str("unknown_kind"),
        }
    }
}

/// Correlates region sets and term sets that share an `img_id`
#[derive(Clone)]
pub struct Correlator {
    store: Arc<dyn PartialFactStore>,
    publisher: Arc<dyn ResultPublisher>,
}

impl Correlator {
    pub fn new(store: Arc<dyn PartialFactStore>, publisher: Arc<dyn ResultPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Process one fact
    ///
    /// Store failures propagate as `StoreUnavailable`. A failed publish
    /// propagates before the delete, leaving both records in place so that a
    /// redelivery of the triggering fact re-derives the same result.
    pub async fn on_fact(&self, fact: PartialFact) -> Result<Outcome> {
        if let Err(reason) = validate(&fact) {
            tracing::warn!("Rejecting fact for img_id {:?}: {}", fact.job_id(), reason);
            return Ok(Outcome::Rejected(reason));
        }

        let store = self.store.as_ref();

        let (job_id, regions, terms) = match fact {
            PartialFact::RegionSet { job_id, regions } => {
                put_record(store, &job_id, FactKind::Regions, &regions).await?;
                let terms: Option<Vec<String>> =
                    get_record(store, &job_id, FactKind::Terms).await?;
                match terms.filter(|t| !t.is_empty()) {
                    Some(terms) => (job_id, regions, terms),
                    None => return Ok(stored(job_id, FactKind::Regions)),
                }
            }
            PartialFact::TermSet { job_id, terms } => {
                put_record(store, &job_id, FactKind::Terms, &terms).await?;
                let regions: Option<Vec<Region>> =
                    get_record(store, &job_id, FactKind::Regions).await?;
                match regions.filter(|r| !r.is_empty()) {
                    Some(regions) => (job_id, regions, terms),
                    None => return Ok(stored(job_id, FactKind::Terms)),
                }
            }
            // validate() refuses these
            PartialFact::Unrecognized { .. } => {
                return Ok(Outcome::Rejected(RejectReason::UnknownKind))
            }
        };

        let result = FilteredResult {
            regions: RedactionFilter::filter(&regions, &terms),
            job_id,
        };

        tracing::info!(
            "Job {} complete: {} of {} regions kept after {} terms",
            result.job_id,
            result.regions.len(),
            regions.len(),
            terms.len()
        );

        self.publisher.publish(&result).await?;
        store.delete_job(&result.job_id).await?;

        Ok(Outcome::Completed(result))
    }
}

fn stored(job_id: String, kind: FactKind) -> Outcome {
    tracing::info!("Stored {} for img_id {}, waiting for {}", kind, job_id, kind.complement());
    Outcome::Stored { job_id, kind }
}

fn validate(fact: &PartialFact) -> std::result::Result<(), RejectReason> {
    if fact.job_id().is_empty() {
        return Err(RejectReason::Invalid("empty img_id".to_string()));
    }

    match fact {
        PartialFact::Unrecognized { .. } => Err(RejectReason::UnknownKind),
        PartialFact::RegionSet { regions, .. } => {
            if regions.is_empty() {
                return Err(RejectReason::Invalid("empty bounding_boxes".to_string()));
            }
            match regions.iter().position(|r| !r.is_well_formed()) {
                Some(index) => Err(RejectReason::Invalid(format!(
                    "bounding box {} has inverted coordinates",
                    index
                ))),
                None => Ok(()),
            }
        }
        PartialFact::TermSet { terms, .. } => {
            if terms.is_empty() {
                Err(RejectReason::Invalid("empty pii_terms".to_string()))
            } else {
                Ok(())
            }
        }
    }
}
