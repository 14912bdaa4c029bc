//! Short-lived in-memory result cache backed by DashMap.
//!
//! Entries carry their own TTL. Expired entries are never returned: `get`
//! evicts them on access, and an optional sweeper thread removes the rest
//! periodically. Values are stored type-erased and retrieved by type.

use std::any::Any;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

/// TTL applied when a caller gives none.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    value: Arc<dyn Any + Send + Sync>,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Concurrent TTL cache. Writes are last-writer-wins.
pub struct ResultCache {
    entries: DashMap<String, CacheEntry>,
    default_ttl: Duration,
}

impl ResultCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Insert or replace `key`. `None` uses the default TTL.
    pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let key = key.into();
        trace!(%key, ?ttl, "cache set");
        self.entries.insert(
            key,
            CacheEntry {
                value: Arc::new(value),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Live value for `key`, if present and of type `T`.
    pub fn get<T: Any + Send + Sync + Clone>(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let value = {
            let entry = self.entries.get(key)?;
            if entry.is_expired(now) {
                None
            } else {
                Some(Arc::clone(&entry.value))
            }
        };
        match value {
            Some(value) => value.downcast_ref::<T>().cloned(),
            None => {
                self.entries.remove_if(key, |_, e| e.is_expired(now));
                trace!(key, "cache entry expired");
                None
            }
        }
    }

    /// Remove `key`. Returns whether a live entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .remove(key)
            .is_some_and(|(_, e)| !e.is_expired(now))
    }

    /// Remove every key starting with `prefix`. Returns how many were removed.
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.starts_with(prefix));
        before.saturating_sub(self.entries.len())
    }

    /// Drop everything. Returns how many entries were held.
    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "cache sweep");
        }
        removed
    }

    /// Entries currently held, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sweep every `interval` on a background thread until the handle drops.
    ///
    /// The thread holds only a weak reference and exits once the cache is gone.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let weak: Weak<Self> = Arc::downgrade(self);
        let thread_signal = Arc::clone(&signal);
        let thread = std::thread::Builder::new()
            .name("cache-sweeper".to_string())
            .spawn(move || {
                let (lock, cvar) = &*thread_signal;
                loop {
                    let stopped = lock.lock().unwrap_or_else(|e| e.into_inner());
                    let (stopped, _) = cvar
                        .wait_timeout_while(stopped, interval, |stop| !*stop)
                        .unwrap_or_else(|e| e.into_inner());
                    if *stopped {
                        break;
                    }
                    drop(stopped);
                    match weak.upgrade() {
                        Some(cache) => {
                            cache.sweep();
                        }
                        None => break,
                    }
                }
            });
        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "cache sweeper thread failed to start");
                None
            }
        };
        SweeperHandle { signal, thread }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.entries.len())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

/// Stops and joins the sweeper thread on drop.
#[derive(Debug)]
pub struct SweeperHandle {
    signal: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.signal;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Cache key construction. Keys name the operation plus every parameter
/// that changes its result. A password only enters a key as a keyed
/// fingerprint, never in clear.
pub mod keys {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, DefaultHasher, Hash, Hasher};
    use std::sync::LazyLock;

    use chrono::Local;

    use crate::mail::access::MailAccessConfig;
    use crate::mail::filter::FetchFilters;
    use crate::mail::message::CanonicalMessage;

    /// Prefix shared by every keyword configuration entry.
    pub const KEYWORDS_PREFIX: &str = "keywords:";

    /// Prefix shared by every detection entry.
    pub const DETECT_PREFIX: &str = "detect:";

    /// Random per process. Fingerprints never leave the process.
    static SECRET_KEY: LazyLock<RandomState> = LazyLock::new(RandomState::new);

    fn fingerprint(secret: &str) -> String {
        format!("{:016x}", SECRET_KEY.hash_one(secret))
    }

    fn account(access: &MailAccessConfig) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            access.protocol,
            access.username.trim().to_lowercase(),
            access.host.trim().to_lowercase(),
            access.port,
            access.ssl,
            fingerprint(&access.password)
        )
    }

    pub fn connection_test(access: &MailAccessConfig) -> String {
        format!("mail:test:{}", account(access))
    }

    /// A missing `since` resolves to today, so the key carries today's date.
    pub fn fetch(access: &MailAccessConfig, filters: &FetchFilters) -> String {
        let since = match filters.since.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => format!("today={}", Local::now().date_naive()),
        };
        format!(
            "mail:fetch:{}:{}:{}:{}:{}:{}",
            account(access),
            access.effective_folder().unwrap_or("-"),
            filters.limit.map_or("-".to_string(), |l| l.to_string()),
            filters.from.as_deref().unwrap_or("-").to_lowercase(),
            filters.to.as_deref().unwrap_or("-").to_lowercase(),
            since
        )
    }

    /// The keyword configuration of one detector generation.
    pub fn keywords(generation: u64) -> String {
        format!("{KEYWORDS_PREFIX}{generation}")
    }

    /// Content hash of everything the analyzers look at, scoped to the
    /// detector generation that scored it.
    pub fn detect_message(generation: u64, message: &CanonicalMessage) -> String {
        let mut hasher = DefaultHasher::new();
        message.subject.hash(&mut hasher);
        message.sender.hash(&mut hasher);
        message.body.hash(&mut hasher);
        for attachment in &message.attachments {
            attachment.filename.hash(&mut hasher);
            attachment.content_type.hash(&mut hasher);
            attachment.size.hash(&mut hasher);
        }
        format!("{DETECT_PREFIX}{generation}:{:016x}", hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::access::{MailAccessConfig, Protocol};
    use crate::mail::filter::FetchFilters;

    #[test]
    fn set_and_get() {
        let cache = ResultCache::default();
        cache.set("a", 42u32, None);
        assert_eq!(cache.get::<u32>("a"), Some(42));
        assert_eq!(cache.get::<u32>("missing"), None);
    }

    #[test]
    fn wrong_type_is_absent() {
        let cache = ResultCache::default();
        cache.set("a", "text".to_string(), None);
        assert_eq!(cache.get::<u32>("a"), None);
        assert_eq!(cache.get::<String>("a").as_deref(), Some("text"));
    }

    #[test]
    fn ttl_expiry() {
        let cache = ResultCache::default();
        cache.set("k", vec![1, 2, 3], Some(Duration::from_millis(100)));
        assert_eq!(cache.get::<Vec<i32>>("k"), Some(vec![1, 2, 3]));
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(cache.get::<Vec<i32>>("k"), None);
        // Lazily evicted on access.
        assert!(cache.is_empty());
    }

    #[test]
    fn delete_reports_presence() {
        let cache = ResultCache::default();
        cache.set("k", 1u8, None);
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
    }

    #[test]
    fn delete_prefix_and_clear() {
        let cache = ResultCache::default();
        cache.set("detect:1", 1u8, None);
        cache.set("detect:2", 2u8, None);
        cache.set("mail:test:x", 3u8, None);
        assert_eq!(cache.delete_prefix("detect:"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn sweep_removes_only_expired() {
        let cache = ResultCache::default();
        cache.set("short", 1u8, Some(Duration::from_millis(10)));
        cache.set("long", 2u8, Some(Duration::from_secs(60)));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.get::<u8>("long"), Some(2));
    }

    #[test]
    fn sweeper_thread_evicts() {
        let cache = Arc::new(ResultCache::default());
        let handle = cache.spawn_sweeper(Duration::from_millis(20));
        cache.set("short", 1u8, Some(Duration::from_millis(10)));
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(cache.len(), 0);
        drop(handle);
    }

    #[test]
    fn concurrent_writers() {
        let cache = Arc::new(ResultCache::default());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for j in 0..100 {
                        cache.set(format!("k{}", j % 10), i * 1000 + j, None);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(cache.len(), 10);
    }

    fn access() -> MailAccessConfig {
        MailAccessConfig {
            host: "IMAP.example.com".to_string(),
            port: 993,
            username: "alice@example.com".to_string(),
            password: "top-secret".to_string(),
            ssl: true,
            protocol: Protocol::Imap,
            folder: None,
        }
    }

    #[test]
    fn keys_never_contain_password() {
        let filters = FetchFilters {
            limit: Some(5),
            since: Some("2025/06/08 22:03".to_string()),
            ..Default::default()
        };
        let test_key = keys::connection_test(&access());
        let fetch_key = keys::fetch(&access(), &filters);
        assert!(!test_key.contains("top-secret"));
        assert!(!fetch_key.contains("top-secret"));
        assert!(test_key.contains("imap.example.com:993"));
        assert!(fetch_key.contains("INBOX:5"));
        assert!(fetch_key.ends_with("2025/06/08 22:03"));
    }

    #[test]
    fn fetch_key_varies_with_filters() {
        let a = keys::fetch(&access(), &FetchFilters::default());
        let b = keys::fetch(
            &access(),
            &FetchFilters {
                from: Some("billing".to_string()),
                ..Default::default()
            },
        );
        assert_ne!(a, b);
    }

    #[test]
    fn password_changes_the_account_key() {
        let mut wrong = access();
        wrong.password = "guessed".to_string();
        assert_ne!(keys::connection_test(&access()), keys::connection_test(&wrong));
        assert_ne!(
            keys::fetch(&access(), &FetchFilters::default()),
            keys::fetch(&wrong, &FetchFilters::default())
        );
        assert!(!keys::connection_test(&wrong).contains("guessed"));
        assert_eq!(keys::connection_test(&access()), keys::connection_test(&access()));
    }

    #[test]
    fn detect_key_is_content_based() {
        let mut m1: crate::mail::message::CanonicalMessage = serde_json::from_str("{}").unwrap();
        m1.subject = "发票".to_string();
        let mut m2 = m1.clone();
        m2.id = "different-id".to_string();
        assert_eq!(keys::detect_message(0, &m1), keys::detect_message(0, &m2));
        m2.body = "changed".to_string();
        assert_ne!(keys::detect_message(0, &m1), keys::detect_message(0, &m2));
        assert!(keys::detect_message(0, &m1).starts_with(keys::DETECT_PREFIX));
    }

    #[test]
    fn detect_key_is_scoped_to_generation() {
        let mut message: crate::mail::message::CanonicalMessage =
            serde_json::from_str("{}").unwrap();
        message.subject = "Invoice".to_string();
        assert_ne!(keys::detect_message(1, &message), keys::detect_message(2, &message));
        assert_ne!(keys::keywords(1), keys::keywords(2));
        assert!(keys::keywords(7).starts_with(keys::KEYWORDS_PREFIX));
    }
}
