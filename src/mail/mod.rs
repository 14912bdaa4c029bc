//! Mailbox access: protocol transports, MIME normalization, retrieval filters.
//!
//! Pipeline:
//! ```text
//! MailAccessConfig ──► transport (IMAP | POP3) ──► RawEmail
//!                                                     │
//!                           normalize ◄───────────────┘
//!                               │
//!                               ▼
//!             RetrievalFilter ──► Vec<CanonicalMessage> (newest first)
//! ```

pub mod access;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod message;
pub mod normalize;
pub mod transport;

pub use access::{MailAccessConfig, Protocol, TransportTimeouts};
pub use error::{MailError, MailResult};
pub use fetch::{FetchOptions, FetchedBatch, MailFetcher};
pub use filter::{FetchFilters, RetrievalFilter};
pub use message::{AttachmentMeta, CanonicalMessage};
pub use transport::{ConnectionReport, MailTransport, RawEmail, SearchCriteria, TransportFactory};
