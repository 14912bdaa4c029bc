//! The invoice detector: weighted combination of the four analyzers.
//!
//! ```text
//! confidence = subject·Ws + sender·Wf + content·Wc + attachment·Wa
//! is_invoice = confidence ≥ threshold
//! ```
//!
//! One [`DetectionConfig`] feeds every detection path (single, batch, scan),
//! so the same message always scores the same under the same configuration.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::mail::message::CanonicalMessage;

use super::analyzers::{attachment_score, content_score, sender_score, subject_score};
use super::error::{DetectError, DetectResult};
use super::extract::{InvoiceInfo, extract_info};
use super::keywords::KeywordConfiguration;
use super::patterns::CompanyPattern;
use super::record::InvoiceRecord;

/// Allowed deviation of the weight sum from 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

// ── Configuration ───────────────────────────────────────────────────────

/// Per-factor weights. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionWeights {
    #[serde(default = "default_subject_weight")]
    pub subject: f64,
    #[serde(default = "default_sender_weight")]
    pub sender: f64,
    #[serde(default = "default_content_weight")]
    pub content: f64,
    #[serde(default = "default_attachment_weight")]
    pub attachment: f64,
}

fn default_subject_weight() -> f64 {
    0.4
}

fn default_sender_weight() -> f64 {
    0.15
}

fn default_content_weight() -> f64 {
    0.15
}

fn default_attachment_weight() -> f64 {
    0.3
}

impl Default for DetectionWeights {
    fn default() -> Self {
        Self {
            subject: default_subject_weight(),
            sender: default_sender_weight(),
            content: default_content_weight(),
            attachment: default_attachment_weight(),
        }
    }
}

impl DetectionWeights {
    pub fn sum(&self) -> f64 {
        self.subject + self.sender + self.content + self.attachment
    }

    pub fn validate(&self) -> DetectResult<()> {
        let parts = [self.subject, self.sender, self.content, self.attachment];
        let in_range = parts.iter().all(|w| w.is_finite() && (0.0..=1.0).contains(w));
        if !in_range || (self.sum() - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(DetectError::InvalidWeights { sum: self.sum() });
        }
        Ok(())
    }
}

/// Weights, threshold and extraction defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default)]
    pub weights: DetectionWeights,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Currency assumed when an amount carries no marker.
    #[serde(default = "default_currency")]
    pub default_currency: String,
}

fn default_threshold() -> f64 {
    0.3
}

fn default_currency() -> String {
    "CNY".to_string()
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            weights: DetectionWeights::default(),
            threshold: default_threshold(),
            default_currency: default_currency(),
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> DetectResult<()> {
        self.weights.validate()?;
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(DetectError::InvalidThreshold {
                threshold: self.threshold,
            });
        }
        Ok(())
    }
}

// ── Results ─────────────────────────────────────────────────────────────

/// The four partial scores, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorScores {
    pub subject: f64,
    pub sender: f64,
    pub content: f64,
    pub attachment: f64,
}

/// Outcome of scoring one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    /// `CanonicalMessage::id` of the scored message.
    pub message_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: String,
    pub is_invoice: bool,
    pub confidence: f64,
    pub scores: FactorScores,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted: Option<InvoiceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DetectionResult {
    /// Zero-confidence, non-invoice result carrying an error note.
    pub fn failed(message_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            subject: String::new(),
            sender: String::new(),
            is_invoice: false,
            confidence: 0.0,
            scores: FactorScores::default(),
            extracted: None,
            error: Some(error.into()),
        }
    }
}

/// Aggregate over a batch of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDetection {
    pub total: usize,
    pub invoice_count: usize,
    pub results: Vec<DetectionResult>,
}

impl BatchDetection {
    pub fn new(results: Vec<DetectionResult>) -> Self {
        Self {
            total: results.len(),
            invoice_count: results.iter().filter(|r| r.is_invoice).count(),
            results,
        }
    }
}

// ── InvoiceDetector ─────────────────────────────────────────────────────

/// Scores messages against one keyword configuration and one weight set.
#[derive(Debug, Clone)]
pub struct InvoiceDetector {
    config: DetectionConfig,
    keywords: KeywordConfiguration,
    subject_terms: Vec<String>,
    sender_terms: Vec<String>,
    amount_terms: Vec<String>,
    company: CompanyPattern,
}

impl InvoiceDetector {
    /// Validate the configuration and precompile keyword-derived patterns.
    pub fn new(config: DetectionConfig, keywords: KeywordConfiguration) -> DetectResult<Self> {
        config.validate()?;
        keywords.validate()?;
        let company = CompanyPattern::compile(&keywords.company_suffixes())?;
        Ok(Self {
            subject_terms: keywords.subject_terms(),
            sender_terms: keywords.sender_terms(),
            amount_terms: keywords.amount_terms(),
            company,
            config,
            keywords,
        })
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn keywords(&self) -> &KeywordConfiguration {
        &self.keywords
    }

    /// Per-factor scores without combination.
    pub fn factor_scores(&self, message: &CanonicalMessage) -> FactorScores {
        FactorScores {
            subject: subject_score(&message.subject, &self.subject_terms),
            sender: sender_score(&message.sender, &self.sender_terms),
            content: content_score(&message.body, &self.amount_terms, &self.company),
            attachment: attachment_score(&message.attachments),
        }
    }

    /// Score one message. Pure: depends only on the message and `self`.
    pub fn detect(&self, message: &CanonicalMessage) -> DetectionResult {
        let scores = self.factor_scores(message);
        let w = &self.config.weights;
        let confidence = (scores.subject * w.subject
            + scores.sender * w.sender
            + scores.content * w.content
            + scores.attachment * w.attachment)
            .clamp(0.0, 1.0);
        let is_invoice = confidence >= self.config.threshold;

        let extracted = is_invoice.then(|| {
            extract_info(
                message,
                &self.amount_terms,
                &self.company,
                &self.config.default_currency,
            )
        });
        debug!(
            id = %message.id,
            confidence,
            is_invoice,
            "scored {}",
            message.summary()
        );

        DetectionResult {
            message_id: message.id.clone(),
            subject: message.subject.clone(),
            sender: message.sender.clone(),
            is_invoice,
            confidence,
            scores,
            extracted,
            error: None,
        }
    }

    /// Score every message and snapshot the outcome into `is_invoice`.
    pub fn detect_all(&self, messages: &mut [CanonicalMessage]) -> BatchDetection {
        let results = messages
            .iter_mut()
            .map(|message| {
                let result = self.detect(message);
                message.is_invoice = result.is_invoice;
                result
            })
            .collect();
        BatchDetection::new(results)
    }

    /// Score loosely-typed input. Items that are not messages yield a
    /// failed result in their slot; the rest of the batch continues.
    pub fn detect_values(&self, items: Vec<serde_json::Value>) -> BatchDetection {
        let results = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let fallback_id = item
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("item-{index}"));
                match message_from_value(item) {
                    Ok(message) => self.detect(&message),
                    Err(e) => DetectionResult::failed(fallback_id, e.to_string()),
                }
            })
            .collect();
        BatchDetection::new(results)
    }

    /// Build the persisted record for an invoice result. `None` otherwise.
    pub fn record_for(
        &self,
        message: &CanonicalMessage,
        result: &DetectionResult,
    ) -> Option<InvoiceRecord> {
        if !result.is_invoice {
            return None;
        }
        let info = result.extracted.clone().unwrap_or_default();
        Some(InvoiceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            message_id: message.message_id.clone(),
            invoice_number: info.invoice_number,
            amount: info.amount,
            currency: info.currency,
            invoice_date: info.invoice_date,
            issuer: info.issuer,
            confidence_score: result.confidence,
            created_at: Utc::now(),
            source: None,
        })
    }
}

/// Decode one JSON item into a message.
pub fn message_from_value(item: serde_json::Value) -> DetectResult<CanonicalMessage> {
    if !item.is_object() {
        return Err(DetectError::InvalidMessage {
            message: format!("expected an object, got {}", json_kind(&item)),
        });
    }
    serde_json::from_value(item).map_err(|e| DetectError::InvalidMessage {
        message: e.to_string(),
    })
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::message::AttachmentMeta;

    fn detector() -> InvoiceDetector {
        InvoiceDetector::new(DetectionConfig::default(), KeywordConfiguration::default()).unwrap()
    }

    fn message(subject: &str, sender: &str, body: &str) -> CanonicalMessage {
        let mut msg: CanonicalMessage = serde_json::from_str("{}").unwrap();
        msg.subject = subject.to_string();
        msg.sender = sender.to_string();
        msg.body = body.to_string();
        msg
    }

    fn pdf() -> AttachmentMeta {
        AttachmentMeta {
            filename: "document.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size: 2048,
            content: None,
        }
    }

    #[test]
    fn default_weights_are_valid() {
        assert!(DetectionConfig::default().validate().is_ok());
        assert!((DetectionWeights::default().sum() - 1.0).abs() < WEIGHT_TOLERANCE);
    }

    #[test]
    fn bad_weights_rejected() {
        let config = DetectionConfig {
            weights: DetectionWeights {
                subject: 0.5,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = InvoiceDetector::new(config, KeywordConfiguration::default()).unwrap_err();
        assert!(matches!(err, DetectError::InvalidWeights { .. }));
    }

    #[test]
    fn bad_threshold_rejected() {
        let config = DetectionConfig {
            threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DetectError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn empty_message_scores_zero() {
        let result = detector().detect(&message("", "", ""));
        assert_eq!(result.confidence, 0.0);
        assert!(!result.is_invoice);
        assert!(result.extracted.is_none());
    }

    #[test]
    fn subject_and_pdf_lower_bound() {
        let w = DetectionWeights::default();
        let bound = w.subject * 0.5 + w.attachment * 0.8;
        for subject in ["发票", "invoice"] {
            let mut msg = message(subject, "", "");
            msg.attachments.push(pdf());
            msg.has_attachments = true;
            let result = detector().detect(&msg);
            assert!(result.confidence >= bound, "{subject}: {}", result.confidence);
            assert!(result.is_invoice);
        }
    }

    #[test]
    fn detection_is_repeatable() {
        let d = detector();
        let msg = message(
            "Invoice INV-2025-001",
            "billing@stripe.com",
            "Amount due: $15.00",
        );
        let a = d.detect(&msg);
        let b = d.detect(&msg);
        assert_eq!(a, b);
        assert!(a.is_invoice);
        let info = a.extracted.unwrap();
        assert_eq!(info.invoice_number.as_deref(), Some("INV-2025-001"));
        assert_eq!(info.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn detect_all_snapshots_flag() {
        let mut messages = vec![
            message("电子发票 账单通知", "", ""),
            message("Lunch?", "friend@example.com", "see you"),
        ];
        let batch = detector().detect_all(&mut messages);
        assert_eq!(batch.total, 2);
        assert_eq!(batch.invoice_count, 1);
        assert!(messages[0].is_invoice);
        assert!(!messages[1].is_invoice);
    }

    #[test]
    fn bad_items_do_not_abort_batch() {
        let items = vec![
            serde_json::json!({"id": "a", "subject": "Your invoice", "sender": "billing@x.com"}),
            serde_json::json!("not a message"),
            serde_json::json!({"id": "c", "subject": 42}),
        ];
        let batch = detector().detect_values(items);
        assert_eq!(batch.total, 3);
        assert!(batch.results[0].error.is_none());
        assert_eq!(batch.results[1].message_id, "item-1");
        assert_eq!(batch.results[1].confidence, 0.0);
        assert!(batch.results[1].error.as_deref().unwrap().contains("string"));
        assert_eq!(batch.results[2].message_id, "c");
        assert!(!batch.results[2].is_invoice);
        assert!(batch.results[2].error.is_some());
    }

    #[test]
    fn record_only_for_invoices() {
        let d = detector();
        let mut msg = message("电子发票", "", "价税合计：¥1,060.00");
        msg.message_id = "<m1@example.com>".to_string();
        let result = d.detect(&msg);
        let record = d.record_for(&msg, &result).unwrap();
        assert_eq!(record.message_id, "<m1@example.com>");
        assert_eq!(record.amount, Some(1060.0));
        assert_eq!(record.confidence_score, result.confidence);

        let plain = message("hello", "", "");
        let result = d.detect(&plain);
        assert!(d.record_for(&plain, &result).is_none());
    }
}
