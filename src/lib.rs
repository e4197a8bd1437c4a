//! piifilter - PII redaction correlation service
//!
//! Text regions detected in an image and the PII terms to redact from it
//! arrive independently on a queue, keyed by `img_id`. Each half is persisted
//! in a key-value store; once both are present the regions containing any
//! term are dropped, the rest are published, and the stored halves deleted.

pub mod cli;
pub mod config;
pub mod correlator;
pub mod daemon;
pub mod error;
pub mod facts;
pub mod filtering;
pub mod ocr;
pub mod storage;
pub mod submit;
pub mod transport;

pub use error::{PiiFilterError, Result};
