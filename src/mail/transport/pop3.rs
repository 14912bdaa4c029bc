//! POP3 transport: a minimal RFC 1939 client session.
//!
//! Only the commands retrieval needs are spoken: `USER`/`PASS`, `STAT`,
//! `LIST`, `RETR` and `QUIT`. Messages are retrieved one at a time on a single
//! connection. A `-ERR` on one message skips it; an I/O failure marks the
//! session broken and ends retrieval with whatever was already read.
//!
//! Message data is kept as raw octets end to end. Only status lines are
//! decoded as text.

use std::io::{BufRead, BufReader, Read, Write};

use tracing::{debug, info, warn};

use crate::mail::access::{MailAccessConfig, Protocol, TransportTimeouts};
use crate::mail::error::{MailError, MailResult};

use super::net::open_stream;
use super::{ConnectionReport, MailTransport, RawEmail, SearchCriteria};

// ── Pop3Session ─────────────────────────────────────────────────────────

/// A POP3 command/response session over any byte stream.
pub struct Pop3Session<S: Read + Write> {
    reader: BufReader<S>,
    broken: bool,
}

impl<S: Read + Write> Pop3Session<S> {
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
            broken: false,
        }
    }

    /// Whether an I/O failure has made the connection unusable.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn read_greeting(&mut self) -> MailResult<String> {
        self.read_status("greeting")
    }

    /// `USER` + `PASS`. Any `-ERR` here is an authentication failure.
    pub fn login(&mut self, username: &str, password: &str) -> MailResult<()> {
        let auth = |e: MailError| match e {
            MailError::Protocol { message } => MailError::Authentication { message },
            other => other,
        };
        self.command(&format!("USER {username}"), "USER").map_err(auth)?;
        // Sent directly so the secret never reaches a log line.
        self.send_line(&format!("PASS {password}"), "PASS")?;
        self.read_status("PASS").map_err(auth)?;
        Ok(())
    }

    /// `STAT`: message count and total maildrop size.
    pub fn stat(&mut self) -> MailResult<(u32, u64)> {
        let line = self.command("STAT", "STAT")?;
        let mut parts = line.split_whitespace();
        let count = parts.next().and_then(|p| p.parse().ok());
        let size = parts.next().and_then(|p| p.parse().ok());
        match (count, size) {
            (Some(count), Some(size)) => Ok((count, size)),
            _ => Err(MailError::Protocol {
                message: format!("STAT: malformed response \"{line}\""),
            }),
        }
    }

    /// `LIST`: every message number with its size.
    pub fn list(&mut self) -> MailResult<Vec<(u32, usize)>> {
        self.command("LIST", "LIST")?;
        let lines = self.read_multiline("LIST")?;
        let mut entries = Vec::with_capacity(lines.len());
        for line in lines {
            let line = String::from_utf8_lossy(&line);
            let mut parts = line.split_whitespace();
            match (
                parts.next().and_then(|p| p.parse().ok()),
                parts.next().and_then(|p| p.parse().ok()),
            ) {
                (Some(number), Some(size)) => entries.push((number, size)),
                _ => debug!(%line, "ignoring malformed LIST entry"),
            }
        }
        Ok(entries)
    }

    /// `RETR n`: the full message, dot-unstuffed, CRLF line endings.
    pub fn retr(&mut self, number: u32) -> MailResult<Vec<u8>> {
        let stage = format!("RETR {number}");
        self.command(&stage, &stage)?;
        let lines = self.read_multiline(&stage)?;
        let mut data = Vec::with_capacity(lines.iter().map(|l| l.len() + 2).sum());
        for line in lines {
            data.extend_from_slice(&line);
            data.extend_from_slice(b"\r\n");
        }
        Ok(data)
    }

    /// `QUIT`. Skipped when the connection is already broken.
    pub fn quit(&mut self) -> MailResult<()> {
        if self.broken {
            return Ok(());
        }
        self.command("QUIT", "QUIT").map(|_| ())
    }

    // ── wire helpers ──

    fn command(&mut self, line: &str, stage: &str) -> MailResult<String> {
        debug!(command = stage, "POP3 >");
        self.send_line(line, stage)?;
        self.read_status(stage)
    }

    fn send_line(&mut self, line: &str, stage: &str) -> MailResult<()> {
        if self.broken {
            return Err(MailError::Connection {
                message: format!("{stage}: session already failed"),
            });
        }
        if line.contains(['\r', '\n']) {
            return Err(MailError::validation(format!(
                "{stage}: command arguments must not contain line breaks"
            )));
        }
        let result = write_line(self.reader.get_mut(), line);
        result.map_err(|e| self.fail(stage, e))
    }

    /// Read one status line; `+OK rest` yields `rest`, `-ERR` is a protocol error.
    fn read_status(&mut self, stage: &str) -> MailResult<String> {
        let raw = self.read_line(stage)?;
        let line = String::from_utf8_lossy(&raw);
        if let Some(rest) = line.strip_prefix("+OK") {
            Ok(rest.trim().to_string())
        } else if let Some(rest) = line.strip_prefix("-ERR") {
            Err(MailError::Protocol {
                message: format!("{stage}: {}", rest.trim()),
            })
        } else {
            self.broken = true;
            Err(MailError::Protocol {
                message: format!("{stage}: unexpected response \"{line}\""),
            })
        }
    }

    /// Lines up to the terminating `.`, dot-unstuffed.
    fn read_multiline(&mut self, stage: &str) -> MailResult<Vec<Vec<u8>>> {
        let mut lines = Vec::new();
        loop {
            let mut line = self.read_line(stage)?;
            if line == b"." {
                return Ok(lines);
            }
            if line.first() == Some(&b'.') {
                line.remove(0);
            }
            lines.push(line);
        }
    }

    /// One line as raw bytes, without its CRLF.
    fn read_line(&mut self, stage: &str) -> MailResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                self.broken = true;
                Err(MailError::Connection {
                    message: format!("{stage}: server closed the connection"),
                })
            }
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                if buf.last() == Some(&b'\r') {
                    buf.pop();
                }
                Ok(buf)
            }
            Err(e) => Err(self.fail(stage, e)),
        }
    }

    fn fail(&mut self, stage: &str, err: std::io::Error) -> MailError {
        self.broken = true;
        MailError::from_io(stage, err)
    }
}

fn write_line<W: Write>(stream: &mut W, line: &str) -> std::io::Result<()> {
    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\r\n")?;
    stream.flush()
}

/// Retrieve the `limit` highest-numbered messages, one `RETR` at a time.
pub(crate) fn fetch_newest<S: Read + Write>(
    session: &mut Pop3Session<S>,
    limit: usize,
) -> MailResult<Vec<RawEmail>> {
    let mut entries = session.list()?;
    entries.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    entries.truncate(limit);

    let mut emails = Vec::with_capacity(entries.len());
    for (number, size) in entries {
        match session.retr(number) {
            Ok(data) => emails.push(RawEmail {
                native_id: number.to_string(),
                data,
                size: Some(size),
                internal_date: None,
            }),
            Err(e) if session.is_broken() => {
                warn!(number, error = %e, "POP3 session lost, stopping retrieval");
                break;
            }
            Err(e) => warn!(number, error = %e, "skipping message"),
        }
    }
    Ok(emails)
}

/// Greet, log in, run `op`, then attempt `QUIT` whatever happened before.
///
/// `after_login` runs once credentials are accepted; the network transport
/// uses it to switch the socket to the I/O timeout.
pub(crate) fn run_session<S: Read + Write, T>(
    session: &mut Pop3Session<S>,
    access: &MailAccessConfig,
    after_login: impl FnOnce() -> MailResult<()>,
    op: impl FnOnce(&mut Pop3Session<S>) -> MailResult<T>,
) -> MailResult<T> {
    let result = login_and_run(session, access, after_login, op);
    if let Err(e) = session.quit() {
        debug!(error = %e, "POP3 QUIT failed");
    }
    result
}

fn login_and_run<S: Read + Write, T>(
    session: &mut Pop3Session<S>,
    access: &MailAccessConfig,
    after_login: impl FnOnce() -> MailResult<()>,
    op: impl FnOnce(&mut Pop3Session<S>) -> MailResult<T>,
) -> MailResult<T> {
    session.read_greeting()?;
    session.login(&access.username, &access.password)?;
    after_login()?;
    debug!(user = %access.username, host = %access.host, "POP3 login ok");
    op(session)
}

// ── Pop3Transport ───────────────────────────────────────────────────────

/// POP3 transport. Has no folders and no server-side search.
pub struct Pop3Transport {
    access: MailAccessConfig,
    timeouts: TransportTimeouts,
}

impl Pop3Transport {
    pub fn new(access: MailAccessConfig, timeouts: TransportTimeouts) -> Self {
        Self { access, timeouts }
    }

    fn with_session<T>(
        &self,
        op: impl FnOnce(&mut Pop3Session<super::net::MailStream>) -> MailResult<T>,
    ) -> MailResult<T> {
        let (stream, guard) = open_stream(&self.access, &self.timeouts)?;
        let mut session = Pop3Session::new(stream);
        let io_timeout = self.timeouts.io;
        let result = run_session(
            &mut session,
            &self.access,
            || guard.set_timeout(io_timeout),
            op,
        );
        drop(guard);
        result
    }
}

impl std::fmt::Debug for Pop3Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pop3Transport")
            .field("host", &self.access.host)
            .field("port", &self.access.port)
            .finish()
    }
}

impl MailTransport for Pop3Transport {
    fn test_connection(&mut self) -> MailResult<ConnectionReport> {
        let (count, size) = self.with_session(|session| session.stat())?;
        let mut report = ConnectionReport::for_access(&self.access);
        report.message_count = Some(count);
        info!(%report, bytes = size, "POP3 connection test passed");
        Ok(report)
    }

    fn list_and_fetch(&mut self, criteria: &SearchCriteria) -> MailResult<Vec<RawEmail>> {
        self.with_session(|session| fetch_newest(session, criteria.limit))
    }

    fn protocol(&self) -> Protocol {
        Protocol::Pop3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Replays a fixed server script and records what the client sent.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl Scripted {
        fn new(script: &str) -> Self {
            Self::from_bytes(script.as_bytes().to_vec())
        }

        fn from_bytes(script: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(script),
                sent: Vec::new(),
            }
        }
    }

    fn sent(session: &Pop3Session<Scripted>) -> String {
        String::from_utf8(session.reader.get_ref().sent.clone()).unwrap()
    }

    fn access() -> MailAccessConfig {
        MailAccessConfig {
            host: "pop.example.com".to_string(),
            port: 995,
            username: "alice".to_string(),
            password: "pw".to_string(),
            ssl: true,
            protocol: Protocol::Pop3,
            folder: None,
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn message(subject: &str) -> String {
        format!("Subject: {subject}\r\n\r\nbody\r\n")
    }

    #[test]
    fn login_and_stat() {
        let mut session = Pop3Session::new(Scripted::new(
            "+OK POP3 ready\r\n+OK\r\n+OK logged in\r\n+OK 3 4200\r\n",
        ));
        session.read_greeting().unwrap();
        session.login("alice", "pw").unwrap();
        assert_eq!(session.stat().unwrap(), (3, 4200));
        assert_eq!(sent(&session), "USER alice\r\nPASS pw\r\nSTAT\r\n");
    }

    #[test]
    fn rejected_password_is_auth_error() {
        let mut session = Pop3Session::new(Scripted::new(
            "+OK ready\r\n+OK\r\n-ERR invalid credentials\r\n",
        ));
        session.read_greeting().unwrap();
        let err = session.login("alice", "wrong").unwrap_err();
        assert!(matches!(err, MailError::Authentication { .. }));
        assert!(!session.is_broken());
    }

    #[test]
    fn retr_unstuffs_dots() {
        let mut session = Pop3Session::new(Scripted::new(
            "+OK 40 octets\r\nSubject: x\r\n\r\n..hidden\r\n.\r\n",
        ));
        let data = session.retr(1).unwrap();
        assert_eq!(data, b"Subject: x\r\n\r\n.hidden\r\n");
    }

    #[test]
    fn retr_keeps_eight_bit_octets() {
        // "发票" in GBK, sent as 8bit.
        let mut script = b"+OK 120 octets\r\n\
Subject: test\r\n\
Content-Type: text/plain; charset=gbk\r\n\
Content-Transfer-Encoding: 8bit\r\n\
\r\n"
            .to_vec();
        script.extend_from_slice(&[0xB7, 0xA2, 0xC6, 0xB1]);
        script.extend_from_slice(b"\r\n.\r\n");
        let mut session = Pop3Session::new(Scripted::from_bytes(script));

        let data = session.retr(1).unwrap();
        assert!(data.ends_with(&[0xB7, 0xA2, 0xC6, 0xB1, b'\r', b'\n']));
        assert!(!data.windows(3).any(|w| w == [0xEF, 0xBF, 0xBD]));
    }

    #[test]
    fn line_breaks_never_reach_the_wire() {
        let mut session = Pop3Session::new(Scripted::new("+OK ready\r\n+OK\r\n"));
        session.read_greeting().unwrap();
        let err = session.login("alice", "pw\r\nDELE 1").unwrap_err();
        assert!(err.is_validation());
        assert!(!sent(&session).contains("DELE"));
    }

    #[test]
    fn failed_operation_still_quits() {
        let mut session = Pop3Session::new(Scripted::new(
            "+OK ready\r\n+OK\r\n+OK\r\n-ERR maildrop locked\r\n+OK bye\r\n",
        ));
        let err = run_session(&mut session, &access(), || Ok(()), |s| s.stat()).unwrap_err();
        assert!(err.to_string().contains("maildrop locked"));
        assert_eq!(sent(&session), "USER alice\r\nPASS pw\r\nSTAT\r\nQUIT\r\n");
    }

    #[test]
    fn rejected_login_still_quits() {
        let mut session = Pop3Session::new(Scripted::new(
            "+OK ready\r\n+OK\r\n-ERR invalid credentials\r\n+OK bye\r\n",
        ));
        let mut ran = false;
        let err = run_session(&mut session, &access(), || Ok(()), |s| {
            ran = true;
            s.stat()
        })
        .unwrap_err();
        assert!(matches!(err, MailError::Authentication { .. }));
        assert!(!ran);
        assert!(sent(&session).ends_with("PASS pw\r\nQUIT\r\n"));
    }

    #[test]
    fn broken_session_surfaces_error_without_quit() {
        // The server hangs up in the middle of LIST.
        let mut session = Pop3Session::new(Scripted::new(
            "+OK ready\r\n+OK\r\n+OK\r\n+OK 2 messages\r\n1 10\r\n",
        ));
        let err = run_session(&mut session, &access(), || Ok(()), |s| fetch_newest(s, 5))
            .unwrap_err();
        assert!(matches!(err, MailError::Connection { .. }));
        assert!(session.is_broken());
        assert!(!sent(&session).contains("QUIT"));
    }

    #[test]
    fn fetch_takes_highest_numbers() {
        let script = format!(
            "+OK 3 messages\r\n1 100\r\n2 200\r\n3 300\r\n.\r\n+OK\r\n{}.\r\n+OK\r\n{}.\r\n",
            message("third"),
            message("second"),
        );
        let mut session = Pop3Session::new(Scripted::new(&script));
        let emails = fetch_newest(&mut session, 2).unwrap();
        let ids: Vec<_> = emails.iter().map(|e| e.native_id.as_str()).collect();
        assert_eq!(ids, ["3", "2"]);
        assert_eq!(emails[0].size, Some(300));
        assert_eq!(sent(&session), "LIST\r\nRETR 3\r\nRETR 2\r\n");
    }

    #[test]
    fn one_failed_retr_is_skipped() {
        let script = format!(
            "+OK\r\n1 10\r\n2 10\r\n3 10\r\n.\r\n+OK\r\n{}.\r\n-ERR no such message\r\n+OK\r\n{}.\r\n",
            message("c"),
            message("a"),
        );
        let mut session = Pop3Session::new(Scripted::new(&script));
        let emails = fetch_newest(&mut session, 10).unwrap();
        let ids: Vec<_> = emails.iter().map(|e| e.native_id.as_str()).collect();
        assert_eq!(ids, ["3", "1"]);
        assert!(!session.is_broken());
    }

    #[test]
    fn lost_connection_returns_partial_batch() {
        // The server disappears after the first message.
        let script = format!(
            "+OK\r\n1 10\r\n2 10\r\n3 10\r\n.\r\n+OK\r\n{}.\r\n",
            message("latest"),
        );
        let mut session = Pop3Session::new(Scripted::new(&script));
        let emails = fetch_newest(&mut session, 10).unwrap();
        assert_eq!(emails.len(), 1);
        assert!(session.is_broken());
        assert!(session.quit().is_ok());
    }

    #[test]
    fn garbage_status_is_protocol_error() {
        let mut session = Pop3Session::new(Scripted::new("* OK IMAP4rev1\r\n"));
        let err = session.read_greeting().unwrap_err();
        assert!(matches!(err, MailError::Protocol { .. }));
    }
}
