//! Regular expressions shared by the content analyzer and field extraction.

use std::sync::LazyLock;

use regex::Regex;

use super::error::{DetectError, DetectResult};

// ── Fixed patterns ──────────────────────────────────────────────────────

/// Labelled invoice number: "Invoice No: INV-2025-001", "发票号码：12345678".
pub(crate) static RE_INVOICE_NUMBER_LABELED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:invoice\s*(?:no\b\.?|number\b|num\b|#)|inv\s*#|发票号码|发票代码|发票编号|票据号码?)\s*[:：#]?\s*([A-Z]{0,6}[-_]?\d[A-Z0-9-]{2,})",
    )
    .unwrap()
});

/// Bare invoice-shaped token: "INV-2025-001", "INV20250001".
pub(crate) static RE_INVOICE_NUMBER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(INV[-_]?\d{3,}(?:-\d+)*)\b").unwrap());

/// Any number that could be a money value, with optional currency marks.
pub(crate) static RE_AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?P<pre>[¥￥$€£]|\b(?:CNY|RMB|USD|EUR|GBP)\b)?\s?(?P<num>\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?|\d+(?:\.\d{1,2})?)\s?(?P<post>元|\b(?:CNY|RMB|USD|EUR|GBP)\b)?",
    )
    .unwrap()
});

/// Labelled tax identifier: "税号：91110000...", "VAT No: GB123456789".
pub(crate) static RE_TAX_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:纳税人识别号|统一社会信用代码|税号|tax\s*id|vat\s*(?:no\.?|number|reg(?:istration)?)|\btin\b|\bein\b)\s*[:：#]?\s*([A-Z0-9][A-Z0-9-]{5,})",
    )
    .unwrap()
});

/// Calendar dates in the accepted invoice date shapes.
pub(crate) static RE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d{4}-\d{1,2}-\d{1,2}|\d{4}/\d{1,2}/\d{1,2}|\d{4}年\d{1,2}月\d{1,2}日|\d{4}\.\d{1,2}\.\d{1,2})",
    )
    .unwrap()
});

// ── Company pattern ─────────────────────────────────────────────────────

/// Issuing-company matcher built from the configured company suffixes.
///
/// Matches a run of CJK characters, or up to six capitalized words, ending in
/// one of the suffixes.
#[derive(Debug, Clone)]
pub struct CompanyPattern {
    regex: Option<Regex>,
}

impl CompanyPattern {
    /// Compile from suffixes ordered longest first. No suffixes never matches.
    pub fn compile(suffixes: &[String]) -> DetectResult<Self> {
        if suffixes.is_empty() {
            return Ok(Self { regex: None });
        }
        let alternatives = suffixes
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!(
            r"(?P<name>(?:[\p{{Han}}（）()]{{2,40}}?|[A-Z][\w&'.-]*(?:,?\s+[A-Z][\w&'.-]*){{0,5}},?\s+)(?:{alternatives}))(?:[^A-Za-z]|$)"
        );
        let regex = Regex::new(&pattern).map_err(|e| DetectError::Pattern {
            message: e.to_string(),
        })?;
        Ok(Self { regex: Some(regex) })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.find(text).is_some()
    }

    /// First company name found in `text`.
    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        let regex = self.regex.as_ref()?;
        regex
            .captures(text)
            .and_then(|caps| caps.name("name"))
            .map(|m| m.as_str().trim())
    }
}
