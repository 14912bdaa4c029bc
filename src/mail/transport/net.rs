//! TCP/TLS stream setup shared by both protocol transports.
//!
//! Every connection carries a [`SocketGuard`]: a cloned handle to the same
//! socket used to retune timeouts after login and to shut the socket down
//! when the operation ends, whichever way it ends.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::mail::access::{MailAccessConfig, TransportTimeouts};
use crate::mail::error::{MailError, MailResult};

/// A plaintext or implicit-TLS stream to a mail server.
#[derive(Debug)]
pub enum MailStream {
    Plain(TcpStream),
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

impl Read for MailStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf),
            Self::Tls(s) => s.read(buf),
        }
    }
}

impl Write for MailStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(s) => s.write(buf),
            Self::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Plain(s) => s.flush(),
            Self::Tls(s) => s.flush(),
        }
    }
}

/// Second handle on the connection's socket.
///
/// Dropping the guard shuts the socket down in both directions.
#[derive(Debug)]
pub struct SocketGuard {
    socket: TcpStream,
}

impl SocketGuard {
    /// Apply `timeout` to both reads and writes on the socket.
    pub fn set_timeout(&self, timeout: Duration) -> MailResult<()> {
        self.socket
            .set_read_timeout(Some(timeout))
            .and_then(|()| self.socket.set_write_timeout(Some(timeout)))
            .map_err(|e| MailError::from_io("socket setup", e))
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            // NotConnected just means the peer already closed.
            if e.kind() != std::io::ErrorKind::NotConnected {
                debug!(error = %e, "socket shutdown failed");
            }
        }
    }
}

/// Connect to `access.host:access.port`, optionally wrapping in TLS.
///
/// The returned socket has the *auth* timeout applied; callers switch to the
/// I/O timeout once login succeeds.
pub fn open_stream(
    access: &MailAccessConfig,
    timeouts: &TransportTimeouts,
) -> MailResult<(MailStream, SocketGuard)> {
    let host = access.host.trim();
    let addrs = (host, access.port)
        .to_socket_addrs()
        .map_err(|e| MailError::Connection {
            message: format!("cannot resolve {host}: {e}"),
        })?;

    let mut last_err = None;
    let mut tcp = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeouts.connect) {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(e) => {
                debug!(%addr, error = %e, "connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    let tcp = match (tcp, last_err) {
        (Some(tcp), _) => tcp,
        (None, Some(e)) => return Err(MailError::from_io("connect", e)),
        (None, None) => {
            return Err(MailError::Connection {
                message: format!("{host} resolved to no addresses"),
            });
        }
    };
    tcp.set_nodelay(true).ok();

    let guard = SocketGuard {
        socket: tcp
            .try_clone()
            .map_err(|e| MailError::from_io("socket setup", e))?,
    };
    // The TLS handshake is part of connecting.
    guard.set_timeout(timeouts.connect)?;

    let stream = if access.ssl {
        let connector = native_tls::TlsConnector::new().map_err(|e| MailError::Connection {
            message: format!("TLS connector build failed: {e}"),
        })?;
        let tls = connector
            .connect(host, tcp)
            .map_err(|e| MailError::Connection {
                message: format!("TLS handshake with {host} failed: {e}"),
            })?;
        MailStream::Tls(Box::new(tls))
    } else {
        MailStream::Plain(tcp)
    };

    guard.set_timeout(timeouts.auth)?;
    debug!(host, port = access.port, ssl = access.ssl, "connected");
    Ok((stream, guard))
}
