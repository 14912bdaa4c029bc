//! Persisted invoice records and aggregate statistics over them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::mail::message::is_positional_message_id;

/// One detected invoice. Created once per qualifying message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRecord {
    pub id: String,
    /// `Message-ID` of the originating message.
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    pub confidence_score: f64,
    pub created_at: DateTime<Utc>,
    /// Mailbox the message was scanned from, as `user@host/folder`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Identity under which a message is recorded once. A header `Message-ID`
/// stands alone; a positional one is qualified by its mailbox.
pub fn dedup_key(message_id: &str, source: Option<&str>) -> String {
    if is_positional_message_id(message_id) {
        format!("{}|{message_id}", source.unwrap_or("-"))
    } else {
        message_id.to_string()
    }
}

impl InvoiceRecord {
    pub fn dedup_key(&self) -> String {
        dedup_key(&self.message_id, self.source.as_deref())
    }

    /// Invoice date, or the record's creation day when none was extracted.
    pub fn effective_date(&self) -> NaiveDate {
        self.invoice_date
            .unwrap_or_else(|| self.created_at.date_naive())
    }
}

/// Earliest and latest invoice date in a record set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<NaiveDate>,
}

/// Totals over a set of invoice records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceStats {
    pub total_count: usize,
    /// Sum of extracted amounts, currencies not distinguished.
    pub total_amount: f64,
    pub average_confidence: f64,
    pub date_range: DateRange,
}

impl InvoiceStats {
    pub fn from_records(records: &[InvoiceRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let total_amount: f64 = records.iter().filter_map(|r| r.amount).sum();
        let confidence_sum: f64 = records.iter().map(|r| r.confidence_score).sum();
        let dates = records.iter().map(InvoiceRecord::effective_date);
        Self {
            total_count: records.len(),
            total_amount: round_to(total_amount, 2),
            average_confidence: round_to(confidence_sum / records.len() as f64, 4),
            date_range: DateRange {
                earliest: dates.clone().min(),
                latest: dates.max(),
            },
        }
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(amount: Option<f64>, confidence: f64, date: Option<NaiveDate>) -> InvoiceRecord {
        InvoiceRecord {
            id: "r".to_string(),
            message_id: "<m@x>".to_string(),
            invoice_number: None,
            amount,
            currency: Some("CNY".to_string()),
            invoice_date: date,
            issuer: None,
            confidence_score: confidence,
            created_at: Utc::now(),
            source: None,
        }
    }

    #[test]
    fn empty_stats() {
        let stats = InvoiceStats::from_records(&[]);
        assert_eq!(stats.total_count, 0);
        assert_eq!(stats.total_amount, 0.0);
        assert_eq!(stats.average_confidence, 0.0);
        assert_eq!(stats.date_range, DateRange::default());
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["dateRange"], serde_json::json!({}));
    }

    #[test]
    fn two_records() {
        let d1 = NaiveDate::from_ymd_opt(2025, 6, 1);
        let d2 = NaiveDate::from_ymd_opt(2025, 6, 8);
        let stats = InvoiceStats::from_records(&[
            record(Some(1000.0), 0.8, d2),
            record(Some(2000.0), 0.9, d1),
        ]);
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.total_amount, 3000.0);
        assert_eq!(stats.average_confidence, 0.85);
        assert_eq!(stats.date_range.earliest, d1);
        assert_eq!(stats.date_range.latest, d2);
    }

    #[test]
    fn missing_amounts_are_ignored() {
        let stats = InvoiceStats::from_records(&[record(None, 0.5, None), record(Some(10.5), 0.7, None)]);
        assert_eq!(stats.total_amount, 10.5);
        assert_eq!(stats.date_range.earliest, Some(Utc::now().date_naive()));
    }

    #[test]
    fn positional_ids_are_qualified_by_mailbox() {
        let mut record = record(None, 0.5, None);
        record.message_id = "<pop3-1@invoice-radar>".to_string();
        record.source = Some("alice@pop.example.com/pop3".to_string());
        assert_eq!(record.dedup_key(), "alice@pop.example.com/pop3|<pop3-1@invoice-radar>");
        assert_ne!(record.dedup_key(), dedup_key(&record.message_id, Some("bob@pop.example.com/pop3")));

        // A header Message-ID is global.
        assert_eq!(dedup_key("<m@x>", Some("alice@pop.example.com/pop3")), "<m@x>");
        assert_eq!(dedup_key("<m@x>", None), "<m@x>");
    }
}
