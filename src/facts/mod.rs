//! Partial facts about a redaction job
//!
//! A job is identified only by its `img_id`. It exists as the set of facts
//! stored under that id: one region set produced by text detection and one
//! term set supplied by the submitter.

mod wire;

pub use wire::{decode_fact, encode_fact, encode_result};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A detected text span with pixel coordinates from the top-left origin
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub text: String,
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl Region {
    pub fn new(text: impl Into<String>, left: i64, top: i64, right: i64, bottom: i64) -> Self {
        Self {
            text: text.into(),
            left,
            top,
            right,
            bottom,
        }
    }

    /// Coordinates describe a non-inverted box
    pub fn is_well_formed(&self) -> bool {
        self.left <= self.right && self.top <= self.bottom
    }
}

/// Which half of a job a fact carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactKind {
    Regions,
    Terms,
}

impl FactKind {
    /// Wire and storage name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            FactKind::Regions => "bounding_boxes",
            FactKind::Terms => "pii_terms",
        }
    }

    /// The kind that completes a job together with this one
    pub fn complement(&self) -> FactKind {
        match self {
            FactKind::Regions => FactKind::Terms,
            FactKind::Terms => FactKind::Regions,
        }
    }

    pub fn all() -> [FactKind; 2] {
        [FactKind::Regions, FactKind::Terms]
    }
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One independently arriving input to a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartialFact {
    RegionSet { job_id: String, regions: Vec<Region> },
    TermSet { job_id: String, terms: Vec<String> },
    /// Well-formed message for a job that carries neither known collection
    Unrecognized { job_id: String },
}

impl PartialFact {
    pub fn job_id(&self) -> &str {
        match self {
            PartialFact::RegionSet { job_id, .. }
            | PartialFact::TermSet { job_id, .. }
            | PartialFact::Unrecognized { job_id } => job_id,
        }
    }

    /// `None` for unrecognized facts
    pub fn kind(&self) -> Option<FactKind> {
        match self {
            PartialFact::RegionSet { .. } => Some(FactKind::Regions),
            PartialFact::TermSet { .. } => Some(FactKind::Terms),
            PartialFact::Unrecognized { .. } => None,
        }
    }
}

/// Regions of a completed job that matched no redaction term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredResult {
    #[serde(rename = "img_id")]
    pub job_id: String,
    #[serde(rename = "filtered_boxes")]
    pub regions: Vec<Region>,
}
