//! Service facade: the operations exposed by the CLI and the daemon.
//!
//! `RadarService` owns the fetcher, the detector, the result cache and the
//! store, and composes them. Every operation is blocking; the daemon runs
//! them on the blocking pool.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{ResultCache, SweeperHandle, keys};
use crate::config::{CacheConfig, RadarConfig};
use crate::detect::engine::message_from_value;
use crate::detect::record::dedup_key;
use crate::detect::{
    BatchDetection, DetectionResult, InvoiceDetector, InvoiceRecord, InvoiceStats,
    KeywordConfiguration,
};
use crate::error::RadarResult;
use crate::mail::transport::NetworkTransports;
use crate::mail::{
    CanonicalMessage, ConnectionReport, FetchFilters, FetchedBatch, MailAccessConfig, MailFetcher,
    TransportFactory,
};
use crate::paths::RadarPaths;
use crate::store::JsonStore;

// ── Outcomes ────────────────────────────────────────────────────────────

/// Result of a connection test. Failures carry the reason in `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOutcome {
    pub success: bool,
    pub message: String,
    pub server: String,
    pub port: u16,
    pub ssl: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ConnectionReport>,
}

/// Result of a fetch. Failures carry the reason in `message`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOutcome {
    pub success: bool,
    pub messages: Vec<CanonicalMessage>,
    pub total: usize,
    pub message: String,
}

/// Fetch summary attached to a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchInfo {
    pub success: bool,
    pub message: String,
    pub retrieved: usize,
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<DateTime<Utc>>,
    /// New invoice records written by this scan.
    pub recorded: usize,
}

/// Fetch plus detection in one call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    #[serde(flatten)]
    pub detection: BatchDetection,
    pub fetch_info: FetchInfo,
}

// ── RadarService ────────────────────────────────────────────────────────

/// The detector in effect and the keyword generation it was built from.
/// Cached keyword and detection entries are keyed by that generation.
struct ActiveDetector {
    generation: u64,
    detector: Arc<InvoiceDetector>,
}

pub struct RadarService {
    fetcher: MailFetcher,
    active: RwLock<ActiveDetector>,
    cache: Arc<ResultCache>,
    store: JsonStore,
    ttls: CacheConfig,
    _sweeper: Option<SweeperHandle>,
}

impl RadarService {
    /// Build a service over explicit transports and store.
    ///
    /// A keyword configuration previously saved in `store` takes precedence
    /// over the built-in defaults.
    pub fn new(
        config: &RadarConfig,
        transports: Arc<dyn TransportFactory>,
        store: JsonStore,
    ) -> RadarResult<Self> {
        let keywords = match store.keyword_configuration() {
            Ok(Some(saved)) => saved,
            Ok(None) => KeywordConfiguration::default(),
            Err(e) => {
                warn!(error = %e, "stored keyword configuration unreadable, using defaults");
                KeywordConfiguration::default()
            }
        };
        let detector = InvoiceDetector::new(config.detection.clone(), keywords)?;
        let cache = Arc::new(ResultCache::new(config.cache.fetch_ttl()));
        let sweeper = config
            .cache
            .sweep_interval()
            .map(|interval| cache.spawn_sweeper(interval));

        info!(
            threshold = config.detection.threshold,
            storage = store.is_enabled(),
            "invoice-radar service ready"
        );
        Ok(Self {
            fetcher: MailFetcher::new(transports, config.mail.fetch_options()),
            active: RwLock::new(ActiveDetector {
                generation: 0,
                detector: Arc::new(detector),
            }),
            cache,
            store,
            ttls: config.cache.clone(),
            _sweeper: sweeper,
        })
    }

    /// Build a service with network transports and the configured store.
    pub fn from_config(config: &RadarConfig, paths: Option<&RadarPaths>) -> RadarResult<Self> {
        let store = match (config.storage.enabled, config.data_dir(paths)) {
            (true, Some(dir)) => {
                crate::paths::ensure_dir(&dir)?;
                JsonStore::open(dir, config.storage.persist_attachment_content)
            }
            (true, None) => {
                warn!("no data directory resolved, persistence disabled");
                JsonStore::disabled()
            }
            (false, _) => JsonStore::disabled(),
        };
        let transports = Arc::new(NetworkTransports::new(config.mail.timeouts()));
        Self::new(config, transports, store)
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn store(&self) -> &JsonStore {
        &self.store
    }

    /// The detector currently in effect.
    pub fn detector(&self) -> Arc<InvoiceDetector> {
        self.active().1
    }

    /// Generation and detector, read together.
    fn active(&self) -> (u64, Arc<InvoiceDetector>) {
        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        (active.generation, Arc::clone(&active.detector))
    }

    // ── mail ──

    /// Test a mailbox login. Invalid parameters are an error; a failed
    /// login is a failed outcome.
    pub fn test_connection(&self, access: &MailAccessConfig) -> RadarResult<ConnectionOutcome> {
        access.validate()?;
        let key = keys::connection_test(access);
        if let Some(hit) = self.cache.get::<ConnectionOutcome>(&key) {
            debug!(%key, "connection test served from cache");
            return Ok(hit);
        }

        let (outcome, ttl) = match self.fetcher.test_connection(access) {
            Ok(report) => (
                ConnectionOutcome {
                    success: true,
                    message: format!("connected: {report}"),
                    server: report.server.clone(),
                    port: report.port,
                    ssl: report.ssl,
                    report: Some(report),
                },
                self.ttls.connection_ttl(),
            ),
            Err(e) => {
                warn!(account = %access.account_key(), error = %e, "connection test failed");
                (
                    ConnectionOutcome {
                        success: false,
                        message: e.to_string(),
                        server: access.host.clone(),
                        port: access.port,
                        ssl: access.ssl,
                        report: None,
                    },
                    self.ttls.failed_connection_ttl(),
                )
            }
        };
        self.cache.set(key, outcome.clone(), Some(ttl));
        Ok(outcome)
    }

    /// Fetch and normalize, going through the cache. Every error, client or
    /// server, is returned as `Err`.
    pub fn fetch_batch(
        &self,
        access: &MailAccessConfig,
        filters: &FetchFilters,
    ) -> RadarResult<FetchedBatch> {
        access.validate()?;
        let key = keys::fetch(access, filters);
        if let Some(hit) = self.cache.get::<FetchedBatch>(&key) {
            debug!(%key, "fetch served from cache");
            return Ok(hit);
        }
        let batch = self.fetcher.fetch(access, filters)?;
        self.cache
            .set(key, batch.clone(), Some(self.ttls.fetch_ttl()));
        Ok(batch)
    }

    /// Fetch for a caller: validation errors are `Err`, everything else is
    /// a failed outcome. Fetched messages are saved when storage is on.
    pub fn fetch(
        &self,
        access: &MailAccessConfig,
        filters: &FetchFilters,
    ) -> RadarResult<FetchOutcome> {
        match self.fetch_batch(access, filters) {
            Ok(batch) => {
                self.persist_messages(access, &batch.messages);
                let total = batch.messages.len();
                Ok(FetchOutcome {
                    success: true,
                    message: format!("fetched {total} messages"),
                    total,
                    messages: batch.messages,
                })
            }
            Err(e) if e.is_client_error() => Err(e),
            Err(e) => {
                warn!(account = %access.account_key(), error = %e, "fetch failed");
                Ok(FetchOutcome {
                    success: false,
                    messages: Vec::new(),
                    total: 0,
                    message: e.to_string(),
                })
            }
        }
    }

    fn persist_messages(&self, access: &MailAccessConfig, messages: &[CanonicalMessage]) {
        if let Err(e) = self.store.save_messages(&access.account_key(), messages) {
            warn!(account = %access.account_key(), error = %e, "failed to persist messages");
        }
    }

    // ── detection ──

    /// Score loosely-typed items. Bad items fail in place.
    pub fn detect_batch(&self, items: Vec<serde_json::Value>) -> BatchDetection {
        let batch = self.detector().detect_values(items);
        info!(total = batch.total, invoices = batch.invoice_count, "batch detection");
        batch
    }

    /// Score typed messages and mark each with its outcome.
    pub fn detect_messages(&self, messages: &mut [CanonicalMessage]) -> BatchDetection {
        self.detector().detect_all(messages)
    }

    /// Score one message through the content-keyed cache.
    pub fn detect_one(&self, item: serde_json::Value) -> RadarResult<DetectionResult> {
        let message = message_from_value(item)?;
        let (generation, detector) = self.active();
        let key = keys::detect_message(generation, &message);
        if let Some(mut hit) = self.cache.get::<DetectionResult>(&key) {
            hit.message_id = message.id;
            return Ok(hit);
        }
        let result = detector.detect(&message);
        self.cache
            .set(key, result.clone(), Some(self.ttls.detection_ttl()));
        Ok(result)
    }

    /// Fetch, score and record invoices.
    ///
    /// A message already recorded keeps its one record; rescans add none.
    pub fn scan(
        &self,
        access: &MailAccessConfig,
        filters: &FetchFilters,
    ) -> RadarResult<ScanReport> {
        let batch = match self.fetch_batch(access, filters) {
            Ok(batch) => batch,
            Err(e) if e.is_client_error() => return Err(e),
            Err(e) => {
                warn!(account = %access.account_key(), error = %e, "scan fetch failed");
                return Ok(ScanReport {
                    detection: BatchDetection::new(Vec::new()),
                    fetch_info: FetchInfo {
                        success: false,
                        message: e.to_string(),
                        retrieved: 0,
                        skipped: 0,
                        lower_bound: None,
                        recorded: 0,
                    },
                });
            }
        };

        let FetchedBatch {
            mut messages,
            lower_bound,
            retrieved,
            skipped,
        } = batch;
        let detector = self.detector();
        let detection = detector.detect_all(&mut messages);
        self.persist_messages(access, &messages);

        let mut recorded_keys: HashSet<String> = match self.store.invoice_records() {
            Ok(records) => records.iter().map(InvoiceRecord::dedup_key).collect(),
            Err(e) => {
                warn!(error = %e, "invoice records unreadable, duplicates possible");
                HashSet::new()
            }
        };
        let source = access.mailbox_key();
        let mut recorded = 0;
        for (message, result) in messages.iter().zip(&detection.results) {
            let key = dedup_key(&message.message_id, Some(&source));
            if recorded_keys.contains(&key) {
                continue;
            }
            let Some(mut record) = detector.record_for(message, result) else {
                continue;
            };
            record.source = Some(source.clone());
            match self.store.save_invoice_record(&record) {
                Ok(_) => {
                    recorded += 1;
                    recorded_keys.insert(key);
                }
                Err(e) => warn!(message_id = %message.message_id, error = %e, "failed to persist invoice record"),
            }
        }

        info!(
            account = %access.account_key(),
            total = detection.total,
            invoices = detection.invoice_count,
            recorded,
            "scan complete"
        );
        Ok(ScanReport {
            fetch_info: FetchInfo {
                success: true,
                message: format!(
                    "scanned {} messages, {} invoices",
                    detection.total, detection.invoice_count
                ),
                retrieved,
                skipped,
                lower_bound: Some(lower_bound),
                recorded,
            },
            detection,
        })
    }

    // ── keywords ──

    /// The keyword configuration in effect.
    pub fn keywords(&self) -> KeywordConfiguration {
        let (generation, detector) = self.active();
        let key = keys::keywords(generation);
        if let Some(hit) = self.cache.get::<KeywordConfiguration>(&key) {
            return hit;
        }
        let current = detector.keywords().clone();
        self.cache
            .set(key, current.clone(), Some(self.ttls.keywords_ttl()));
        current
    }

    /// Replace the keyword configuration wholesale.
    ///
    /// Invalid configurations are rejected before anything changes. Cached
    /// keywords and every cached detection are invalidated. A detection
    /// still in flight lands under the old generation and is never served.
    pub fn update_keywords(&self, config: KeywordConfiguration) -> RadarResult<KeywordConfiguration> {
        let config = config.cleaned();
        let current = self.detector();
        let detector = InvoiceDetector::new(current.config().clone(), config.clone())?;

        if let Err(e) = self.store.update_keyword_configuration(&config) {
            warn!(error = %e, "failed to persist keyword configuration");
        }
        let generation = {
            let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
            active.generation += 1;
            active.detector = Arc::new(detector);
            active.generation
        };

        self.cache.delete_prefix(keys::KEYWORDS_PREFIX);
        let dropped = self.cache.delete_prefix(keys::DETECT_PREFIX);
        info!(
            generation,
            buckets = config.buckets().len(),
            dropped_detections = dropped,
            "keyword configuration updated"
        );
        Ok(config)
    }

    // ── invoices ──

    /// Persisted invoice records, newest first.
    pub fn invoices(&self) -> RadarResult<Vec<InvoiceRecord>> {
        let mut records = self.store.invoice_records()?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    pub fn invoice_stats(&self) -> RadarResult<InvoiceStats> {
        Ok(InvoiceStats::from_records(&self.store.invoice_records()?))
    }

    /// Drop every cache entry. Returns how many were held.
    pub fn clear_cache(&self) -> usize {
        let cleared = self.cache.clear();
        info!(cleared, "cache cleared");
        cleared
    }
}

impl std::fmt::Debug for RadarService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadarService")
            .field("fetcher", &self.fetcher)
            .field("cache", &self.cache)
            .field("store", &self.store)
            .finish()
    }
}
