//! JSON file store. Writes go to a temp file that is renamed into place.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::detect::{InvoiceRecord, KeywordConfiguration};
use crate::error::StoreError;
use crate::mail::message::CanonicalMessage;

use super::{StoreResult, sanitize_account_key};

const MESSAGES_DIR: &str = "messages";
const INVOICES_FILE: &str = "invoices.json";
const KEYWORDS_FILE: &str = "keywords.json";

/// Flat JSON persistence. Disabled stores hold no directory.
#[derive(Debug)]
pub struct JsonStore {
    root: Option<PathBuf>,
    persist_attachment_content: bool,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// A store rooted at `data_dir`. The directory is created on first write.
    pub fn open(data_dir: impl Into<PathBuf>, persist_attachment_content: bool) -> Self {
        Self {
            root: Some(data_dir.into()),
            persist_attachment_content,
            write_lock: Mutex::new(()),
        }
    }

    /// A store that writes nothing and reads nothing.
    pub fn disabled() -> Self {
        Self {
            root: None,
            persist_attachment_content: false,
            write_lock: Mutex::new(()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn messages_path(&self, root: &Path, account_key: &str) -> PathBuf {
        root.join(MESSAGES_DIR)
            .join(format!("{}.json", sanitize_account_key(account_key)))
    }

    // ── messages ──

    /// Merge `messages` into the account's file, replacing entries with the
    /// same `Message-ID`. Returns how many messages the file now holds.
    pub fn save_messages(
        &self,
        account_key: &str,
        messages: &[CanonicalMessage],
    ) -> StoreResult<usize> {
        let Some(root) = &self.root else {
            return Ok(0);
        };
        let path = self.messages_path(root, account_key);
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut stored: Vec<CanonicalMessage> = read_json(&path)?.unwrap_or_default();
        for message in messages {
            let mut message = message.clone();
            if !self.persist_attachment_content {
                message.strip_attachment_content();
            }
            match stored
                .iter_mut()
                .find(|m| !m.message_id.is_empty() && m.message_id == message.message_id)
            {
                Some(existing) => *existing = message,
                None => stored.push(message),
            }
        }
        stored.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        write_json(&path, &stored)?;
        debug!(account = account_key, saved = messages.len(), total = stored.len(), "messages saved");
        Ok(stored.len())
    }

    /// Messages previously saved for `account_key`, newest first.
    pub fn load_messages(&self, account_key: &str) -> StoreResult<Vec<CanonicalMessage>> {
        let Some(root) = &self.root else {
            return Ok(Vec::new());
        };
        Ok(read_json(&self.messages_path(root, account_key))?.unwrap_or_default())
    }

    // ── invoice records ──

    /// Append a record. Returns its id.
    pub fn save_invoice_record(&self, record: &InvoiceRecord) -> StoreResult<String> {
        let Some(root) = &self.root else {
            return Ok(record.id.clone());
        };
        let path = root.join(INVOICES_FILE);
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<InvoiceRecord> = read_json(&path)?.unwrap_or_default();
        records.push(record.clone());
        write_json(&path, &records)?;
        info!(id = %record.id, message_id = %record.message_id, "invoice record saved");
        Ok(record.id.clone())
    }

    pub fn invoice_records(&self) -> StoreResult<Vec<InvoiceRecord>> {
        let Some(root) = &self.root else {
            return Ok(Vec::new());
        };
        Ok(read_json(&root.join(INVOICES_FILE))?.unwrap_or_default())
    }

    // ── keywords ──

    /// The stored keyword configuration, if one was ever saved.
    pub fn keyword_configuration(&self) -> StoreResult<Option<KeywordConfiguration>> {
        let Some(root) = &self.root else {
            return Ok(None);
        };
        read_json(&root.join(KEYWORDS_FILE))
    }

    pub fn update_keyword_configuration(&self, config: &KeywordConfiguration) -> StoreResult<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        write_json(&root.join(KEYWORDS_FILE), config)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// `None` when the file does not exist.
fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::Serialization {
            path: path.display().to_string(),
            message: e.to_string(),
        })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialization {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes).map_err(|e| io_error(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_error(path, e))
}
