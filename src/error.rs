//! Rich diagnostic error types for invoice-radar.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. [`RadarError`] wraps them all so the
//! CLI and daemon can report any failure with its full diagnostic.

use miette::Diagnostic;
use thiserror::Error;

use crate::detect::DetectError;
use crate::mail::MailError;
use crate::paths::PathError;

/// Top-level error type.
#[derive(Debug, Error, Diagnostic)]
pub enum RadarError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Mail(#[from] MailError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] PathError),
}

impl RadarError {
    /// Whether the caller sent something unusable (as opposed to a server
    /// or environment failure).
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Mail(e) => e.is_validation(),
            Self::Detect(DetectError::InvalidKeywords { .. } | DetectError::InvalidMessage { .. }) => {
                true
            }
            _ => false,
        }
    }
}

/// Convenience alias for service-level operations.
pub type RadarResult<T> = std::result::Result<T, RadarError>;

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    #[diagnostic(
        code(radar::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error in {path}: {message}")]
    #[diagnostic(
        code(radar::store::serde),
        help(
            "A stored JSON file could not be read or written. If it was edited by hand, \
             fix the syntax or move the file aside to start fresh."
        )
    )]
    Serialization { path: String, message: String },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    #[diagnostic(
        code(radar::config::io),
        help("Check that the config file exists and is readable, or run `invoice-radar init`.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    #[diagnostic(
        code(radar::config::parse),
        help("The config file is not valid TOML for this version. Compare it with `invoice-radar init --print`.")
    )]
    Parse { path: String, message: String },

    #[error("invalid config value for {field}: {message}")]
    #[diagnostic(
        code(radar::config::invalid),
        help("Fix the named field in the config file or the matching environment variable.")
    )]
    Invalid { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mail_error_converts_transparently() {
        let err: RadarError = MailError::Timeout {
            stage: "login".to_string(),
        }
        .into();
        assert!(err.to_string().contains("login"));
        assert!(!err.is_client_error());
        let code = err.code().map(|c| c.to_string());
        assert_eq!(code.as_deref(), Some("radar::mail::timeout"));
    }

    #[test]
    fn validation_is_client_error() {
        let err: RadarError = MailError::Validation {
            message: "bad since".to_string(),
        }
        .into();
        assert!(err.is_client_error());
    }

    #[test]
    fn store_error_display() {
        let err = StoreError::Serialization {
            path: "/tmp/invoices.json".to_string(),
            message: "expected value".to_string(),
        };
        assert!(err.to_string().contains("invoices.json"));
    }

    #[test]
    fn config_invalid_display() {
        let err = ConfigError::Invalid {
            field: "server.port".to_string(),
            message: "must be non-zero".to_string(),
        };
        assert!(err.to_string().contains("server.port"));
    }
}
