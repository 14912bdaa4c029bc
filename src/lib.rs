// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # invoice-radar
//!
//! Fetches mail over IMAP or POP3 and scores each message for the likelihood
//! that it is an invoice.
//!
//! ## Architecture
//!
//! - **Mail** (`mail`): protocol transports, MIME normalization, retrieval filters
//! - **Detection** (`detect`): keyword buckets, four analyzers, weighted scoring, extraction
//! - **Cache** (`cache`): DashMap-backed TTL cache with a background sweeper
//! - **Store** (`store`): flat JSON persistence for messages, invoices and keywords
//! - **Service** (`service`): the operations the CLI and daemon expose
//!
//! ## Library usage
//!
//! ```no_run
//! use invoice_radar::detect::{DetectionConfig, InvoiceDetector, KeywordConfiguration};
//! use invoice_radar::mail::CanonicalMessage;
//!
//! let detector =
//!     InvoiceDetector::new(DetectionConfig::default(), KeywordConfiguration::default()).unwrap();
//! let message: CanonicalMessage =
//!     serde_json::from_str(r#"{"subject":"发票通知","sender":"billing@example.com"}"#).unwrap();
//! let result = detector.detect(&message);
//! println!("invoice: {} ({:.2})", result.is_invoice, result.confidence);
//! ```

pub mod cache;
pub mod config;
pub mod detect;
pub mod error;
pub mod mail;
pub mod paths;
pub mod service;
pub mod store;
