//! Invoice detection error types.

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised while configuring the detector or decoding its input.
#[derive(Debug, Error, Diagnostic)]
pub enum DetectError {
    #[error("detection weights must sum to 1.0, got {sum}")]
    #[diagnostic(
        code(radar::detect::weights),
        help(
            "Adjust `[detection.weights]` so subject + sender + content + attachment = 1.0. \
             Each weight must also be between 0 and 1."
        )
    )]
    InvalidWeights { sum: f64 },

    #[error("detection threshold must be within [0, 1], got {threshold}")]
    #[diagnostic(
        code(radar::detect::threshold),
        help("Set `[detection] threshold` to a value between 0.0 and 1.0 (default 0.3).")
    )]
    InvalidThreshold { threshold: f64 },

    #[error("invalid keyword configuration: {message}")]
    #[diagnostic(
        code(radar::detect::keywords),
        help(
            "A keyword configuration needs at least two language buckets, each with \
             `subject`, `sender`, `amount` and `companySuffix` lists."
        )
    )]
    InvalidKeywords { message: String },

    #[error("pattern compilation failed: {message}")]
    #[diagnostic(
        code(radar::detect::pattern),
        help("A configured company suffix produced an unusable pattern. Remove unusual characters.")
    )]
    Pattern { message: String },

    #[error("invalid message: {message}")]
    #[diagnostic(
        code(radar::detect::message),
        help("Each message must be a JSON object with at least `subject`, `sender` or `body`.")
    )]
    InvalidMessage { message: String },
}

/// Convenience alias for detection operations.
pub type DetectResult<T> = std::result::Result<T, DetectError>;
