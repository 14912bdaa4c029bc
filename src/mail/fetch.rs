//! Validated, filtered retrieval on top of a [`TransportFactory`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::access::MailAccessConfig;
use super::error::MailResult;
use super::filter::{FetchFilters, RetrievalFilter};
use super::message::CanonicalMessage;
use super::normalize::normalize;
use super::transport::{ConnectionReport, TransportFactory};

/// Retrieval limits shared by every fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub default_limit: usize,
    pub max_limit: usize,
    pub max_attachment_bytes: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 200,
            max_attachment_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Result of one fetch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedBatch {
    /// Newest first.
    pub messages: Vec<CanonicalMessage>,
    /// The lower time bound that was applied.
    pub lower_bound: DateTime<Utc>,
    /// Raw messages the server returned.
    pub retrieved: usize,
    /// Raw messages that failed to parse.
    pub skipped: usize,
}

/// Fetches and normalizes mail for one request at a time.
#[derive(Clone)]
pub struct MailFetcher {
    transports: Arc<dyn TransportFactory>,
    options: FetchOptions,
}

impl MailFetcher {
    pub fn new(transports: Arc<dyn TransportFactory>, options: FetchOptions) -> Self {
        Self {
            transports,
            options,
        }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Log in and report mailbox facts.
    pub fn test_connection(&self, access: &MailAccessConfig) -> MailResult<ConnectionReport> {
        access.validate()?;
        self.transports.open(access).test_connection()
    }

    /// Validate, connect, retrieve, normalize and filter.
    ///
    /// Validation failures happen before any connection is opened. A message
    /// that fails to parse is logged and skipped.
    pub fn fetch(
        &self,
        access: &MailAccessConfig,
        filters: &FetchFilters,
    ) -> MailResult<FetchedBatch> {
        access.validate()?;
        let filter = RetrievalFilter::from_request(
            filters,
            self.options.default_limit,
            self.options.max_limit,
        )?;

        let mut transport = self.transports.open(access);
        let protocol = transport.protocol();
        let raw = transport.list_and_fetch(&filter.criteria())?;
        drop(transport);

        let retrieved = raw.len();
        let mut skipped = 0;
        let mut messages = Vec::with_capacity(retrieved);
        for email in &raw {
            match normalize(email, protocol, self.options.max_attachment_bytes) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    skipped += 1;
                    warn!(native_id = %email.native_id, error = %e, "skipping unparseable message");
                }
            }
        }

        let messages = filter.apply(messages);
        info!(
            account = %access.account_key(),
            %protocol,
            retrieved,
            skipped,
            kept = messages.len(),
            "fetch complete"
        );
        Ok(FetchedBatch {
            messages,
            lower_bound: filter.lower_bound,
            retrieved,
            skipped,
        })
    }
}

impl std::fmt::Debug for MailFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailFetcher")
            .field("options", &self.options)
            .finish()
    }
}
