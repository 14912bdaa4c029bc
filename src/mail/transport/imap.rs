//! IMAP transport over the `imap` crate.

use std::io::{Read, Write};

use chrono::Utc;
use tracing::{debug, info};

use crate::mail::access::{MailAccessConfig, Protocol, TransportTimeouts};
use crate::mail::error::{MailError, MailResult};

use super::net::open_stream;
use super::{ConnectionReport, MailTransport, RawEmail, SearchCriteria};

/// IMAP transport. Folders are opened read-only with `EXAMINE`.
pub struct ImapTransport {
    access: MailAccessConfig,
    timeouts: TransportTimeouts,
}

impl ImapTransport {
    pub fn new(access: MailAccessConfig, timeouts: TransportTimeouts) -> Self {
        Self { access, timeouts }
    }

    fn folder(&self) -> &str {
        self.access
            .effective_folder()
            .unwrap_or(crate::mail::access::DEFAULT_FOLDER)
    }

    /// Connect, log in, run `op` and always attempt LOGOUT.
    fn with_session<T>(
        &self,
        op: impl FnOnce(&mut ::imap::Session<super::net::MailStream>) -> MailResult<T>,
    ) -> MailResult<T> {
        let (stream, guard) = open_stream(&self.access, &self.timeouts)?;
        let mut session = login(stream, &self.access)?;
        let io_timeout = self.timeouts.io;
        let result = run_session(&mut session, |session| {
            guard.set_timeout(io_timeout)?;
            op(session)
        });
        drop(guard);
        result
    }
}

// ── session helpers ──

/// Read the greeting and log in over an open stream.
fn login<S: Read + Write>(stream: S, access: &MailAccessConfig) -> MailResult<::imap::Session<S>> {
    let mut client = ::imap::Client::new(stream);
    client
        .read_greeting()
        .map_err(|e| map_imap_error("greeting", e))?;

    let session = client
        .login(&access.username, &access.password)
        .map_err(|(e, _client)| match e {
            ::imap::Error::No(msg) | ::imap::Error::Bad(msg) => {
                MailError::Authentication { message: msg }
            }
            other => map_imap_error("login", other),
        })?;
    debug!(user = %access.username, host = %access.host, "IMAP login ok");
    Ok(session)
}

/// Run `op`, then attempt LOGOUT whether or not it succeeded.
fn run_session<S: Read + Write, T>(
    session: &mut ::imap::Session<S>,
    op: impl FnOnce(&mut ::imap::Session<S>) -> MailResult<T>,
) -> MailResult<T> {
    let result = op(session);
    if let Err(e) = session.logout() {
        debug!(error = %e, "IMAP logout failed");
    }
    result
}

/// Folder names plus the message count of `folder`.
fn survey<S: Read + Write>(
    session: &mut ::imap::Session<S>,
    folder: &str,
) -> MailResult<(Vec<String>, u32)> {
    let names = session
        .list(Some(""), Some("*"))
        .map_err(|e| map_imap_error("LIST", e))?;
    let folders: Vec<String> = names.iter().map(|n| n.name().to_string()).collect();
    let mailbox = session
        .examine(folder)
        .map_err(|e| map_imap_error(&format!("EXAMINE {folder}"), e))?;
    Ok((folders, mailbox.exists))
}

/// `EXAMINE`, `UID SEARCH`, then `UID FETCH` for the newest `limit` hits.
fn fetch_newest<S: Read + Write>(
    session: &mut ::imap::Session<S>,
    folder: &str,
    criteria: &SearchCriteria,
) -> MailResult<Vec<RawEmail>> {
    let query = criteria.imap_query();
    session
        .examine(folder)
        .map_err(|e| map_imap_error(&format!("EXAMINE {folder}"), e))?;

    let found = session
        .uid_search(&query)
        .map_err(|e| map_imap_error("UID SEARCH", e))?;
    let uids = newest_uids(found, criteria.limit);
    debug!(%folder, %query, selected = uids.len(), "IMAP search done");
    if uids.is_empty() {
        return Ok(Vec::new());
    }

    let uid_set = uids
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let fetches = session
        .uid_fetch(&uid_set, "(RFC822 INTERNALDATE)")
        .map_err(|e| map_imap_error("UID FETCH", e))?;

    let mut emails = Vec::with_capacity(fetches.len());
    for fetch in fetches.iter() {
        let Some(body) = fetch.body() else {
            debug!(seq = fetch.message, "fetch response without body");
            continue;
        };
        emails.push(RawEmail {
            native_id: fetch.uid.unwrap_or(fetch.message).to_string(),
            data: body.to_vec(),
            size: Some(body.len()),
            internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
        });
    }
    Ok(emails)
}

impl std::fmt::Debug for ImapTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapTransport")
            .field("host", &self.access.host)
            .field("port", &self.access.port)
            .field("folder", &self.folder())
            .finish()
    }
}

impl MailTransport for ImapTransport {
    fn test_connection(&mut self) -> MailResult<ConnectionReport> {
        let folder = self.folder().to_string();
        let (folders, exists) = self.with_session(|session| survey(session, &folder))?;

        let mut report = ConnectionReport::for_access(&self.access);
        report.folders = folders;
        report.message_count = Some(exists);
        info!(%report, "IMAP connection test passed");
        Ok(report)
    }

    fn list_and_fetch(&mut self, criteria: &SearchCriteria) -> MailResult<Vec<RawEmail>> {
        let folder = self.folder().to_string();
        self.with_session(|session| fetch_newest(session, &folder, criteria))
    }

    fn protocol(&self) -> Protocol {
        Protocol::Imap
    }
}

/// Highest `limit` UIDs, descending. UIDs grow with arrival order.
fn newest_uids(found: impl IntoIterator<Item = u32>, limit: usize) -> Vec<u32> {
    let mut uids: Vec<u32> = found.into_iter().collect();
    uids.sort_unstable_by(|a, b| b.cmp(a));
    uids.truncate(limit);
    uids
}

fn map_imap_error(stage: &str, err: ::imap::Error) -> MailError {
    match err {
        ::imap::Error::Io(io) => MailError::from_io(stage, io),
        ::imap::Error::ConnectionLost => MailError::Connection {
            message: format!("{stage}: connection lost"),
        },
        ::imap::Error::No(msg) | ::imap::Error::Bad(msg) => MailError::Protocol {
            message: format!("{stage}: {msg}"),
        },
        other => MailError::Protocol {
            message: format!("{stage}: {other}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// Replays a server script; what the client writes is shared so it can
    /// be read after the session takes ownership of the stream.
    #[derive(Debug)]
    struct Scripted {
        input: Cursor<Vec<u8>>,
        sent: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn scripted(script: &str) -> (Scripted, Arc<Mutex<Vec<u8>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let stream = Scripted {
            input: Cursor::new(script.as_bytes().to_vec()),
            sent: Arc::clone(&sent),
        };
        (stream, sent)
    }

    fn text(sent: &Arc<Mutex<Vec<u8>>>) -> String {
        String::from_utf8(sent.lock().unwrap().clone()).unwrap()
    }

    fn access() -> MailAccessConfig {
        MailAccessConfig {
            host: "imap.example.com".to_string(),
            port: 993,
            username: "u".to_string(),
            password: "hunter2".to_string(),
            ssl: true,
            protocol: Protocol::Imap,
            folder: Some("Bills".to_string()),
        }
    }

    fn criteria() -> SearchCriteria {
        SearchCriteria {
            limit: 5,
            ..SearchCriteria::default()
        }
    }

    #[test]
    fn failed_examine_still_logs_out() {
        let (stream, sent) = scripted(
            "* OK ready\r\n\
             a1 OK LOGIN completed\r\n\
             a2 NO no such mailbox\r\n\
             a3 OK LOGOUT completed\r\n",
        );
        let mut session = login(stream, &access()).unwrap();
        let err = run_session(&mut session, |s| fetch_newest(s, "Bills", &criteria())).unwrap_err();

        assert!(matches!(err, MailError::Protocol { .. }));
        assert!(err.to_string().contains("EXAMINE Bills"));
        let sent = text(&sent);
        assert!(sent.contains("a2 EXAMINE"));
        assert!(sent.ends_with("a3 LOGOUT\r\n"));
    }

    #[test]
    fn lost_connection_attempts_logout_and_surfaces_error() {
        // The server goes away before answering UID SEARCH.
        let (stream, sent) = scripted(
            "* OK ready\r\n\
             a1 OK LOGIN completed\r\n\
             * 3 EXISTS\r\n\
             a2 OK EXAMINE completed\r\n",
        );
        let mut session = login(stream, &access()).unwrap();
        let err = run_session(&mut session, |s| fetch_newest(s, "Bills", &criteria())).unwrap_err();

        assert!(matches!(err, MailError::Connection { .. }));
        let sent = text(&sent);
        assert!(sent.contains("a3 UID SEARCH ALL"));
        assert!(sent.contains("a4 LOGOUT"));
    }

    #[test]
    fn rejected_login_is_auth_error() {
        let (stream, sent) = scripted("* OK ready\r\na1 NO invalid credentials\r\n");
        let err = login(stream, &access()).unwrap_err();
        assert!(matches!(err, MailError::Authentication { .. }));
        assert!(text(&sent).starts_with("a1 LOGIN"));
    }

    #[test]
    fn newest_uids_sorted_and_truncated() {
        let found = [3u32, 17, 9, 12, 1];
        assert_eq!(newest_uids(found, 3), vec![17, 12, 9]);
        assert_eq!(newest_uids(found, 10).len(), 5);
        assert!(newest_uids(Vec::new(), 5).is_empty());
    }

    #[test]
    fn io_timeout_maps_to_timeout() {
        let err = map_imap_error(
            "UID FETCH",
            ::imap::Error::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, "slow")),
        );
        assert!(matches!(err, MailError::Timeout { .. }));
    }

    #[test]
    fn no_response_maps_to_protocol() {
        let err = map_imap_error("EXAMINE Spam", ::imap::Error::No("no such box".to_string()));
        assert!(err.to_string().contains("EXAMINE Spam"));
    }

    #[test]
    fn debug_hides_password() {
        let transport = ImapTransport::new(access(), TransportTimeouts::default());
        let dbg = format!("{transport:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("Bills"));
    }
}
