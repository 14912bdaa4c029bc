//! Flat-file persistence for fetched messages, invoice records and keywords.
//!
//! Layout under the data directory:
//!
//! ```text
//! <data_dir>/messages/<account_key>.json   fetched messages per mailbox
//! <data_dir>/invoices.json                 every InvoiceRecord
//! <data_dir>/keywords.json                 the active KeywordConfiguration
//! ```
//!
//! A disabled [`JsonStore`] accepts every write as a no-op and reads as empty.

pub mod json;

pub use json::JsonStore;

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Make an account key safe to use as a file name.
pub fn sanitize_account_key(key: &str) -> String {
    let cleaned: String = key
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_keys_are_file_safe() {
        assert_eq!(
            sanitize_account_key("alice@imap.example.com"),
            "alice@imap.example.com"
        );
        assert_eq!(sanitize_account_key("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_account_key("a b/c"), "a_b_c");
        assert_eq!(sanitize_account_key(".."), "_");
    }
}
