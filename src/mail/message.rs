//! The protocol-independent message model every fetch produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::access::Protocol;

/// One attachment of a [`CanonicalMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    /// File name as declared by the sender (may be empty).
    #[serde(default)]
    pub filename: String,
    /// Declared MIME type, e.g. `application/pdf`.
    #[serde(default)]
    pub content_type: String,
    /// Decoded size in bytes.
    #[serde(default)]
    pub size: usize,
    /// Decoded bytes. Dropped for attachments above the size limit.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "base64_bytes"
    )]
    pub content: Option<Vec<u8>>,
}

impl AttachmentMeta {
    /// Lowercased file extension, if any.
    pub fn extension(&self) -> Option<String> {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

/// A normalized email, independent of the protocol it was fetched with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalMessage {
    /// Identifier generated for this fetch. Not stable across fetches.
    #[serde(default = "new_message_id")]
    pub id: String,
    /// IMAP UID or POP3 message number.
    #[serde(default)]
    pub native_id: String,
    /// `Message-ID` header, or a positional fallback.
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub sender: String,
    /// All `To` recipients, comma-joined.
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub subject: String,
    /// Plain-text body.
    #[serde(default)]
    pub body: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
    #[serde(default)]
    pub has_attachments: bool,
    /// Snapshot of the last detection outcome.
    #[serde(default)]
    pub is_invoice: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl CanonicalMessage {
    /// A short summary suitable for log lines: "Subject (from sender)".
    pub fn summary(&self) -> String {
        format!("{} (from {})", self.subject, self.sender)
    }

    /// Drop in-memory attachment bytes.
    pub fn strip_attachment_content(&mut self) {
        for attachment in &mut self.attachments {
            attachment.content = None;
        }
    }
}

/// Generate a fresh per-fetch message identifier.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Fallback `Message-ID` used when a message carries none.
pub fn positional_message_id(protocol: Protocol, position: &str) -> String {
    format!("<{protocol}-{position}{POSITIONAL_SUFFIX}")
}

const POSITIONAL_SUFFIX: &str = "@invoice-radar>";

/// Whether `message_id` came from [`positional_message_id`]. Such ids are
/// only unique inside one mailbox.
pub fn is_positional_message_id(message_id: &str) -> bool {
    message_id.ends_with(POSITIONAL_SUFFIX)
}

mod base64_bytes {
    //! Standard base64 for optional byte payloads.

    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(d)?;
        text.map(|t| STANDARD.decode(t.trim()).map_err(serde::de::Error::custom))
            .transpose()
    }
}
