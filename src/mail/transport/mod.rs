//! Mail transport abstraction: one trait, one implementation per protocol.
//!
//! `MailTransport` hides the difference between a folder/search protocol
//! (IMAP) and a flat numbered list (POP3). A transport value lives for exactly
//! one logical operation: connect, authenticate, do one thing, close.
//!
//! - [`ImapTransport`] drives the `imap` crate over a [`net::MailStream`].
//! - [`Pop3Transport`] drives a small POP3 command session over the same stream.
//! - [`MockTransport`] replays canned messages for tests.

pub mod imap;
pub mod mock;
pub mod net;
pub mod pop3;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::access::{MailAccessConfig, Protocol, TransportTimeouts};
use super::error::MailResult;

pub use self::imap::ImapTransport;
pub use self::mock::MockTransport;
pub use self::pop3::Pop3Transport;

// ── RawEmail ────────────────────────────────────────────────────────────

/// A raw message as retrieved from the server, before MIME parsing.
#[derive(Debug, Clone)]
pub struct RawEmail {
    /// IMAP UID or POP3 message number.
    pub native_id: String,
    /// Raw RFC 5322 bytes.
    pub data: Vec<u8>,
    /// Server-reported size, when the protocol provides one.
    pub size: Option<usize>,
    /// Server-side arrival time (IMAP `INTERNALDATE`).
    pub internal_date: Option<DateTime<Utc>>,
}

// ── SearchCriteria ──────────────────────────────────────────────────────

/// What a transport should retrieve.
///
/// IMAP turns this into a server-side `UID SEARCH`; POP3 can only honour
/// `limit` and leaves the rest to the client-side filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    /// Day-granular lower bound for the server-side search.
    pub since_date: Option<NaiveDate>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    /// Maximum number of messages to retrieve.
    pub limit: usize,
}

impl SearchCriteria {
    /// Render as an IMAP SEARCH key list, or `ALL` when unconstrained.
    pub fn imap_query(&self) -> String {
        let mut keys = Vec::new();
        if let Some(sender) = self.sender.as_deref().filter(|s| !s.is_empty()) {
            keys.push(format!("FROM {}", quote_imap(sender)));
        }
        if let Some(recipient) = self.recipient.as_deref().filter(|s| !s.is_empty()) {
            keys.push(format!("TO {}", quote_imap(recipient)));
        }
        if let Some(date) = self.since_date {
            keys.push(format!("SINCE {}", date.format("%d-%b-%Y")));
        }
        if keys.is_empty() {
            "ALL".to_string()
        } else {
            keys.join(" ")
        }
    }
}

/// Quote a string as an IMAP quoted-string.
fn quote_imap(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\r' | '\n' => {}
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

// ── ConnectionReport ────────────────────────────────────────────────────

/// What a successful connection test learned about the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    pub protocol: Protocol,
    pub server: String,
    pub port: u16,
    pub ssl: bool,
    /// Folder names (IMAP only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub folders: Vec<String>,
    /// Messages in the examined folder or the POP3 maildrop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u32>,
}

impl ConnectionReport {
    pub(crate) fn for_access(access: &MailAccessConfig) -> Self {
        Self {
            protocol: access.protocol,
            server: access.host.clone(),
            port: access.port,
            ssl: access.ssl,
            folders: Vec::new(),
            message_count: None,
        }
    }
}

impl std::fmt::Display for ConnectionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}:{} ({})",
            self.protocol,
            self.server,
            self.port,
            if self.ssl { "tls" } else { "plain" }
        )?;
        if let Some(count) = self.message_count {
            write!(f, ", {count} messages")?;
        }
        if !self.folders.is_empty() {
            write!(f, ", {} folders", self.folders.len())?;
        }
        Ok(())
    }
}

// ── MailTransport trait ─────────────────────────────────────────────────

/// A single-use connection to one mailbox.
///
/// Each method opens its own connection and closes it before returning,
/// on success and on error alike.
pub trait MailTransport: Send {
    /// Authenticate and report basic mailbox facts.
    fn test_connection(&mut self) -> MailResult<ConnectionReport>;

    /// Retrieve raw messages matching `criteria`, at most `criteria.limit`.
    fn list_and_fetch(&mut self, criteria: &SearchCriteria) -> MailResult<Vec<RawEmail>>;

    /// The protocol this transport speaks.
    fn protocol(&self) -> Protocol;
}

/// Produces a transport for a request's access parameters.
pub trait TransportFactory: Send + Sync {
    fn open(&self, access: &MailAccessConfig) -> Box<dyn MailTransport>;
}

/// The real network transports, selected by [`Protocol`].
#[derive(Debug, Clone, Default)]
pub struct NetworkTransports {
    pub timeouts: TransportTimeouts,
}

impl NetworkTransports {
    pub fn new(timeouts: TransportTimeouts) -> Self {
        Self { timeouts }
    }
}

impl TransportFactory for NetworkTransports {
    fn open(&self, access: &MailAccessConfig) -> Box<dyn MailTransport> {
        open(access, self.timeouts)
    }
}

/// Select the transport for `access.protocol`.
pub fn open(access: &MailAccessConfig, timeouts: TransportTimeouts) -> Box<dyn MailTransport> {
    match access.protocol {
        Protocol::Imap => Box::new(ImapTransport::new(access.clone(), timeouts)),
        Protocol::Pop3 => Box::new(Pop3Transport::new(access.clone(), timeouts)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconstrained_query_is_all() {
        assert_eq!(SearchCriteria::default().imap_query(), "ALL");
    }

    #[test]
    fn query_combines_keys() {
        let criteria = SearchCriteria {
            since_date: NaiveDate::from_ymd_opt(2025, 6, 8),
            sender: Some("billing@example.com".to_string()),
            recipient: Some("me@example.com".to_string()),
            limit: 5,
        };
        assert_eq!(
            criteria.imap_query(),
            r#"FROM "billing@example.com" TO "me@example.com" SINCE 08-Jun-2025"#
        );
    }

    #[test]
    fn quoting_escapes_and_strips_newlines() {
        assert_eq!(quote_imap("a\"b\\c\r\nd"), r#""a\"b\\cd""#);
    }

    #[test]
    fn open_selects_by_protocol() {
        let mut access = MailAccessConfig {
            host: "mail.example.com".to_string(),
            port: 995,
            username: "u".to_string(),
            password: "p".to_string(),
            ssl: true,
            protocol: Protocol::Pop3,
            folder: None,
        };
        assert_eq!(
            open(&access, TransportTimeouts::default()).protocol(),
            Protocol::Pop3
        );
        access.protocol = Protocol::Imap;
        assert_eq!(
            NetworkTransports::default().open(&access).protocol(),
            Protocol::Imap
        );
    }

    #[test]
    fn report_display() {
        let report = ConnectionReport {
            protocol: Protocol::Imap,
            server: "imap.example.com".to_string(),
            port: 993,
            ssl: true,
            folders: vec!["INBOX".to_string()],
            message_count: Some(12),
        };
        assert_eq!(
            report.to_string(),
            "imap imap.example.com:993 (tls), 12 messages, 1 folders"
        );
    }
}
