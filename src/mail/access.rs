//! Mailbox access parameters supplied with every request.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{MailError, MailResult};

/// Folder used when an IMAP request names none.
pub const DEFAULT_FOLDER: &str = "INBOX";

// ── Protocol ────────────────────────────────────────────────────────────

/// Which retrieval protocol to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// IMAP: named folders and server-side search.
    Imap,
    /// POP3: one flat numbered list, no search.
    Pop3,
}

impl Protocol {
    /// Conventional port for this protocol.
    pub fn default_port(self, ssl: bool) -> u16 {
        match (self, ssl) {
            (Self::Imap, true) => 993,
            (Self::Imap, false) => 143,
            (Self::Pop3, true) => 995,
            (Self::Pop3, false) => 110,
        }
    }

    /// Whether the protocol has a folder concept.
    pub fn supports_folders(self) -> bool {
        matches!(self, Self::Imap)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Imap => write!(f, "imap"),
            Self::Pop3 => write!(f, "pop3"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = MailError;

    fn from_str(s: &str) -> MailResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "imap" => Ok(Self::Imap),
            "pop3" | "pop" => Ok(Self::Pop3),
            other => Err(MailError::validation(format!(
                "unknown protocol \"{other}\" (expected imap or pop3)"
            ))),
        }
    }
}

// ── MailAccessConfig ────────────────────────────────────────────────────

/// Connection and credential parameters for one mailbox.
///
/// The password is accepted on input but never serialized back out.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailAccessConfig {
    /// Mail server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login name, usually the mailbox address.
    pub username: String,
    /// Login secret.
    #[serde(default, skip_serializing)]
    pub password: String,
    /// Implicit TLS on connect.
    #[serde(default = "default_ssl")]
    pub ssl: bool,
    /// Protocol selector.
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    /// Folder to read (IMAP only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
}

fn default_ssl() -> bool {
    true
}

fn default_protocol() -> Protocol {
    Protocol::Imap
}

impl MailAccessConfig {
    /// Reject obviously unusable parameters before touching the network.
    pub fn validate(&self) -> MailResult<()> {
        if self.host.trim().is_empty() {
            return Err(MailError::validation("host must not be empty"));
        }
        if self.port == 0 {
            return Err(MailError::validation("port must be non-zero"));
        }
        if self.username.trim().is_empty() {
            return Err(MailError::validation("username must not be empty"));
        }
        if self.password.is_empty() {
            return Err(MailError::validation("password must not be empty"));
        }
        if let Some(folder) = &self.folder {
            if folder.trim().is_empty() {
                return Err(MailError::validation("folder must not be blank when given"));
            }
        }
        // Every field ends up inside a protocol command line.
        let fields = [
            ("host", Some(self.host.as_str())),
            ("username", Some(self.username.as_str())),
            ("password", Some(self.password.as_str())),
            ("folder", self.folder.as_deref()),
        ];
        for (name, value) in fields {
            if value.is_some_and(|v| v.chars().any(char::is_control)) {
                return Err(MailError::validation(format!(
                    "{name} must not contain control characters"
                )));
            }
        }
        Ok(())
    }

    /// The folder to open, falling back to `INBOX`. `None` for POP3.
    pub fn effective_folder(&self) -> Option<&str> {
        if !self.protocol.supports_folders() {
            return None;
        }
        Some(self.folder.as_deref().unwrap_or(DEFAULT_FOLDER))
    }

    /// Stable per-mailbox key: `username@host`.
    pub fn account_key(&self) -> String {
        format!("{}@{}", self.username.trim(), self.host.trim())
    }

    /// The account plus the folder messages are read from.
    pub fn mailbox_key(&self) -> String {
        match self.effective_folder() {
            Some(folder) => format!("{}/{folder}", self.account_key()),
            None => format!("{}/{}", self.account_key(), self.protocol),
        }
    }
}

impl std::fmt::Debug for MailAccessConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailAccessConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ssl", &self.ssl)
            .field("protocol", &self.protocol)
            .field("folder", &self.folder)
            .finish()
    }
}

// ── TransportTimeouts ───────────────────────────────────────────────────

/// Socket-level timeouts applied by every transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTimeouts {
    /// TCP connect plus TLS handshake.
    pub connect: Duration,
    /// Server greeting and login exchange.
    pub auth: Duration,
    /// Every read/write after login.
    pub io: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            auth: Duration::from_secs(15),
            io: Duration::from_secs(30),
        }
    }
}
