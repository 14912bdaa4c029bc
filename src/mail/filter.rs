//! Time, sender, recipient and count constraints on a fetch.
//!
//! IMAP applies part of this server-side through [`SearchCriteria`]; POP3
//! has no search, so everything happens here. The minute-precision lower
//! bound is always re-checked client-side because IMAP `SINCE` is date-only.

use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{MailError, MailResult};
use super::message::CanonicalMessage;
use super::transport::SearchCriteria;

/// Accepted `since` shape: `2025/06/08 22:03`.
pub const SINCE_FORMAT: &str = "%Y/%m/%d %H:%M";

static RE_SINCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}/\d{2}/\d{2} \d{2}:\d{2}$").unwrap());

/// Parse a `since` value in local time. Anything but `YYYY/MM/DD HH:mm` is
/// a validation error.
pub fn parse_since(value: &str) -> MailResult<DateTime<Utc>> {
    let value = value.trim();
    let invalid = || {
        MailError::validation(format!(
            "invalid since \"{value}\": expected YYYY/MM/DD HH:mm, e.g. 2025/06/08 22:03"
        ))
    };
    if !RE_SINCE.is_match(value) {
        return Err(invalid());
    }
    let naive = NaiveDateTime::parse_from_str(value, SINCE_FORMAT).map_err(|_| invalid())?;
    // A DST gap has no local instant; an overlap takes the earlier one.
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(invalid)
}

/// Midnight at the start of the current local day.
pub fn start_of_today() -> DateTime<Utc> {
    let today = Local::now().date_naive();
    today
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        .map(|local| local.with_timezone(&Utc))
        // Midnight skipped by DST: fall back to "now minus a day" worth of mail.
        .unwrap_or_else(|| Utc::now() - chrono::Duration::days(1))
}

// ── FetchFilters ────────────────────────────────────────────────────────

/// Filters as supplied by a caller, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Sender substring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Recipient substring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// `YYYY/MM/DD HH:mm`, local time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
}

// ── RetrievalFilter ─────────────────────────────────────────────────────

/// Validated retrieval constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalFilter {
    pub lower_bound: DateTime<Utc>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub limit: usize,
}

impl RetrievalFilter {
    /// Validate caller filters. No `since` means "since the start of today";
    /// a missing limit takes `default_limit`; any limit is capped at `max_limit`.
    pub fn from_request(
        filters: &FetchFilters,
        default_limit: usize,
        max_limit: usize,
    ) -> MailResult<Self> {
        let lower_bound = match filters.since.as_deref().map(str::trim) {
            Some(since) if !since.is_empty() => parse_since(since)?,
            _ => start_of_today(),
        };
        let limit = match filters.limit {
            Some(0) => return Err(MailError::validation("limit must be at least 1")),
            Some(n) => n.min(max_limit),
            None => default_limit.min(max_limit),
        };
        let clean = |s: &Option<String>| {
            s.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Ok(Self {
            lower_bound,
            sender: clean(&filters.from),
            recipient: clean(&filters.to),
            limit,
        })
    }

    /// The part of this filter a server can evaluate.
    pub fn criteria(&self) -> SearchCriteria {
        SearchCriteria {
            since_date: Some(self.lower_bound.with_timezone(&Local).date_naive()),
            sender: self.sender.clone(),
            recipient: self.recipient.clone(),
            limit: self.limit,
        }
    }

    /// Whether one message passes every constraint except `limit`.
    pub fn matches(&self, message: &CanonicalMessage) -> bool {
        message.timestamp >= self.lower_bound
            && contains_ci(&message.sender, self.sender.as_deref())
            && contains_ci(&message.recipient, self.recipient.as_deref())
    }

    /// Keep matching messages, newest first, at most `limit`.
    pub fn apply(&self, messages: Vec<CanonicalMessage>) -> Vec<CanonicalMessage> {
        let mut kept: Vec<CanonicalMessage> =
            messages.into_iter().filter(|m| self.matches(m)).collect();
        kept.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        kept.truncate(self.limit);
        kept
    }
}

fn contains_ci(haystack: &str, needle: Option<&str>) -> bool {
    match needle {
        None => true,
        Some(needle) => haystack.to_lowercase().contains(&needle.to_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn msg(sender: &str, recipient: &str, at: DateTime<Utc>) -> CanonicalMessage {
        CanonicalMessage {
            id: "id".to_string(),
            native_id: "1".to_string(),
            message_id: "<m@x>".to_string(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            subject: String::new(),
            body: String::new(),
            timestamp: at,
            attachments: Vec::new(),
            has_attachments: false,
            is_invoice: false,
            created_at: at,
        }
    }

    fn filter(since: &str, limit: Option<usize>) -> RetrievalFilter {
        RetrievalFilter::from_request(
            &FetchFilters {
                since: Some(since.to_string()),
                limit,
                ..Default::default()
            },
            20,
            200,
        )
        .unwrap()
    }

    #[test]
    fn since_parses_local_minute() {
        let bound = parse_since("2025/06/08 22:03").unwrap();
        let local = bound.with_timezone(&Local);
        assert_eq!(local.format(SINCE_FORMAT).to_string(), "2025/06/08 22:03");
    }

    #[test]
    fn since_rejects_other_shapes() {
        for bad in [
            "2025-06-08 22:03",
            "2025/6/8 22:03",
            "2025/06/08",
            "2025/06/08 22:03:00",
            "2025/13/08 22:03",
            "yesterday",
        ] {
            let err = parse_since(bad).unwrap_err();
            assert!(err.is_validation(), "{bad} should be rejected");
        }
    }

    #[test]
    fn minute_boundary_is_inclusive() {
        let f = filter("2025/06/08 22:03", None);
        let at = f.lower_bound;
        assert!(f.matches(&msg("a", "b", at)));
        assert!(!f.matches(&msg("a", "b", at - Duration::seconds(1))));
        assert!(f.matches(&msg("a", "b", at + Duration::minutes(1))));
    }

    #[test]
    fn no_since_means_start_of_today() {
        let f = RetrievalFilter::from_request(&FetchFilters::default(), 20, 200).unwrap();
        assert_eq!(f.lower_bound, start_of_today());
        assert_eq!(f.limit, 20);
        assert!(f.lower_bound <= Utc::now());
    }

    #[test]
    fn limit_capped_and_zero_rejected() {
        assert_eq!(filter("2025/06/08 22:03", Some(1000)).limit, 200);
        let err = RetrievalFilter::from_request(
            &FetchFilters {
                limit: Some(0),
                ..Default::default()
            },
            20,
            200,
        )
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn sender_and_recipient_are_case_insensitive_contains() {
        let f = RetrievalFilter {
            lower_bound: Utc::now() - Duration::days(1),
            sender: Some("BILLING".to_string()),
            recipient: Some("alice".to_string()),
            limit: 10,
        };
        let now = Utc::now();
        assert!(f.matches(&msg("Billing <billing@shop.com>", "Alice@example.com", now)));
        assert!(!f.matches(&msg("news@shop.com", "alice@example.com", now)));
        assert!(!f.matches(&msg("billing@shop.com", "bob@example.com", now)));
    }

    #[test]
    fn apply_sorts_newest_first_and_truncates() {
        let base = Utc::now() - Duration::hours(1);
        let f = RetrievalFilter {
            lower_bound: base - Duration::days(1),
            sender: None,
            recipient: None,
            limit: 5,
        };
        let messages: Vec<_> = (0..8)
            .map(|i| msg("s", "r", base + Duration::minutes(i)))
            .collect();
        let kept = f.apply(messages);
        assert_eq!(kept.len(), 5);
        assert_eq!(kept[0].timestamp, base + Duration::minutes(7));
        assert!(kept.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[test]
    fn criteria_carries_date_and_limit() {
        let f = filter("2025/06/08 22:03", Some(5));
        let c = f.criteria();
        assert_eq!(c.limit, 5);
        assert_eq!(
            c.since_date,
            Some(chrono::NaiveDate::from_ymd_opt(2025, 6, 8).unwrap())
        );
    }
}
