//! Mail subsystem error types with rich miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised while validating, connecting to, or reading from a mailbox.
#[derive(Debug, Error, Diagnostic)]
pub enum MailError {
    #[error("invalid request: {message}")]
    #[diagnostic(
        code(radar::mail::validation),
        help(
            "Check the request fields. Host, port, username and password are required; \
             `since` must look like `2025/06/08 22:03`."
        )
    )]
    Validation { message: String },

    #[error("mail connection failed: {message}")]
    #[diagnostic(
        code(radar::mail::connection),
        help(
            "Check that the mail server is reachable and the host/port are correct. \
             Port 993 (IMAP) and 995 (POP3) expect TLS; 143 and 110 are plaintext."
        )
    )]
    Connection { message: String },

    #[error("mail authentication failed: {message}")]
    #[diagnostic(
        code(radar::mail::auth),
        help(
            "Check the username and password. Many providers require an app-specific \
             password or an authorization code instead of the account password."
        )
    )]
    Authentication { message: String },

    #[error("mail server timed out during {stage}")]
    #[diagnostic(
        code(radar::mail::timeout),
        help("The server did not answer in time. Raise the `[mail]` timeouts or retry later.")
    )]
    Timeout { stage: String },

    #[error("unexpected mail server response: {message}")]
    #[diagnostic(
        code(radar::mail::protocol),
        help("The server answered with something the client could not interpret.")
    )]
    Protocol { message: String },

    #[error("message parsing failed: {message}")]
    #[diagnostic(
        code(radar::mail::parse),
        help(
            "The MIME message could not be parsed. It may be malformed or use an \
             unsupported encoding."
        )
    )]
    Parse { message: String },
}

impl MailError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Whether this error was raised before any network access happened.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Map a socket error into a timeout or connection error for `stage`.
    pub(crate) fn from_io(stage: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Self::Timeout {
                stage: stage.to_string(),
            },
            _ => Self::Connection {
                message: format!("{stage}: {err}"),
            },
        }
    }
}

/// Convenience alias for mail operations.
pub type MailResult<T> = std::result::Result<T, MailError>;
