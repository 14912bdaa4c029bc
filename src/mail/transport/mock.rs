//! In-memory transport for tests.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::mail::access::{MailAccessConfig, Protocol};
use crate::mail::error::{MailError, MailResult};

use super::{ConnectionReport, MailTransport, RawEmail, SearchCriteria, TransportFactory};

#[derive(Debug, Default)]
struct MockState {
    inbox: Vec<RawEmail>,
    failure: Option<String>,
    auth_failure: bool,
    criteria: Vec<SearchCriteria>,
    connections: usize,
}

/// Scripted transport. Clones share one mailbox, so a clone handed to a
/// service can still be inspected by the test that created it.
///
/// Also acts as its own [`TransportFactory`].
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    protocol: Option<Protocol>,
    server: String,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw message. Messages are returned in push order.
    pub fn push_raw(&self, raw: RawEmail) {
        self.lock().inbox.push(raw);
    }

    /// Queue raw RFC 5322 text under `native_id`.
    pub fn push_message(&self, native_id: &str, rfc822: &str) {
        self.push_raw(RawEmail {
            native_id: native_id.to_string(),
            data: rfc822.as_bytes().to_vec(),
            size: Some(rfc822.len()),
            internal_date: None,
        });
    }

    /// Make every following call fail with a connection error.
    pub fn fail_with(&self, message: &str) {
        self.lock().failure = Some(message.to_string());
    }

    /// Make every following call fail authentication.
    pub fn reject_login(&self) {
        self.lock().auth_failure = true;
    }

    /// Number of simulated connections opened so far.
    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    /// Criteria passed to every `list_and_fetch` call, in order.
    pub fn criteria(&self) -> Vec<SearchCriteria> {
        self.lock().criteria.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not poison the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn connect(&self) -> MailResult<MutexGuard<'_, MockState>> {
        let mut state = self.lock();
        state.connections += 1;
        if let Some(message) = &state.failure {
            return Err(MailError::Connection {
                message: message.clone(),
            });
        }
        if state.auth_failure {
            return Err(MailError::Authentication {
                message: "mock login rejected".to_string(),
            });
        }
        Ok(state)
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("inbox_len", &self.lock().inbox.len())
            .field("protocol", &self.protocol())
            .finish()
    }
}

impl MailTransport for MockTransport {
    fn test_connection(&mut self) -> MailResult<ConnectionReport> {
        let protocol = self.protocol();
        let server = self.server.clone();
        let state = self.connect()?;
        Ok(ConnectionReport {
            protocol,
            server,
            port: protocol.default_port(true),
            ssl: true,
            folders: if protocol.supports_folders() {
                vec!["INBOX".to_string()]
            } else {
                Vec::new()
            },
            message_count: Some(state.inbox.len() as u32),
        })
    }

    fn list_and_fetch(&mut self, criteria: &SearchCriteria) -> MailResult<Vec<RawEmail>> {
        let mut state = self.connect()?;
        state.criteria.push(criteria.clone());
        Ok(state.inbox.iter().take(criteria.limit).cloned().collect())
    }

    fn protocol(&self) -> Protocol {
        self.protocol.unwrap_or(Protocol::Imap)
    }
}

impl TransportFactory for MockTransport {
    fn open(&self, access: &MailAccessConfig) -> Box<dyn MailTransport> {
        Box::new(Self {
            state: Arc::clone(&self.state),
            protocol: Some(access.protocol),
            server: access.host.clone(),
        })
    }
}
