//! Invoice detection: keyword configuration, analyzers, scoring and extraction.
//!
//! Scoring pipeline per message:
//! 1. Four analyzers each produce a partial score in `[0, 1]`
//! 2. Partial scores are combined with [`DetectionWeights`] (sum = 1)
//! 3. `confidence ≥ threshold` classifies the message as an invoice
//! 4. Invoices get field extraction and, optionally, an [`InvoiceRecord`]

pub mod analyzers;
pub mod engine;
pub mod error;
pub mod extract;
pub mod keywords;
pub mod patterns;
pub mod record;

pub use engine::{
    BatchDetection, DetectionConfig, DetectionResult, DetectionWeights, FactorScores,
    InvoiceDetector,
};
pub use error::{DetectError, DetectResult};
pub use extract::InvoiceInfo;
pub use keywords::{KeywordBucket, KeywordConfiguration};
pub use record::{DateRange, InvoiceRecord, InvoiceStats};
