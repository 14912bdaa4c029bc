//! The four partial scores: subject, sender, content and attachments.
//!
//! Every analyzer returns a value clamped to `[0, 1]`. Keyword matching is
//! case-insensitive substring matching; each distinct term counts once.

use crate::mail::message::AttachmentMeta;

use super::patterns::{
    CompanyPattern, RE_AMOUNT, RE_DATE, RE_INVOICE_NUMBER_LABELED, RE_INVOICE_NUMBER_TOKEN,
    RE_TAX_ID,
};

// ── Increments ──────────────────────────────────────────────────────────

/// Subject hit on a configured keyword.
const SUBJECT_KEYWORD: f64 = 0.4;
/// Subject hit on a built-in fallback term.
const SUBJECT_FALLBACK: f64 = 0.2;

/// Sender hit on a configured keyword.
const SENDER_KEYWORD: f64 = 0.3;
/// Sender on a known invoicing platform.
const SENDER_PLATFORM: f64 = 0.4;

const CONTENT_INVOICE_NUMBER: f64 = 0.3;
const CONTENT_AMOUNT: f64 = 0.2;
const CONTENT_TAX_ID: f64 = 0.2;
const CONTENT_DATE: f64 = 0.1;
const CONTENT_COMPANY: f64 = 0.1;
const CONTENT_AMOUNT_KEYWORD: f64 = 0.1;

const ATTACHMENT_PDF: f64 = 0.8;
const ATTACHMENT_NAMED: f64 = 0.4;
const ATTACHMENT_DOCUMENT: f64 = 0.2;

/// Subject terms that count even with an empty keyword configuration.
pub const FALLBACK_SUBJECT_TERMS: &[&str] = &[
    "invoice", "bill", "receipt", "statement", "发票", "账单", "收据",
];

/// Invoicing platforms and e-invoice services, matched against the sender.
pub const KNOWN_INVOICE_DOMAINS: &[&str] = &[
    "nuonuo.com",
    "baiwang.com",
    "chinatax.gov.cn",
    "fapiao.com",
    "aisino.com",
    "jss.com.cn",
    "stripe.com",
    "paypal.com",
    "intuit.com",
    "xero.com",
    "freshbooks.com",
    "zoho.com",
    "alipay.com",
];

/// Invoice-related terms looked for in attachment filenames.
pub const INVOICE_FILENAME_TERMS: &[&str] = &[
    "invoice", "receipt", "bill", "statement", "fapiao", "发票", "账单", "收据",
];

const DOCUMENT_EXTENSIONS: &[&str] = &["doc", "docx", "odt", "rtf", "xls", "xlsx", "ods", "csv"];

const DOCUMENT_CONTENT_TYPES: &[&str] = &[
    "msword",
    "wordprocessingml",
    "opendocument.text",
    "ms-excel",
    "spreadsheetml",
    "opendocument.spreadsheet",
    "text/csv",
];

fn clamp(score: f64) -> f64 {
    score.clamp(0.0, 1.0)
}

fn count_hits<'a>(haystack: &str, terms: impl IntoIterator<Item = &'a str>) -> usize {
    terms
        .into_iter()
        .filter(|t| !t.is_empty() && haystack.contains(*t))
        .count()
}

// ── Subject ─────────────────────────────────────────────────────────────

/// `subject_terms` must already be lowercased and distinct.
pub fn subject_score(subject: &str, subject_terms: &[String]) -> f64 {
    let subject = subject.to_lowercase();
    if subject.trim().is_empty() {
        return 0.0;
    }
    let keyword_hits = count_hits(&subject, subject_terms.iter().map(String::as_str));
    let fallback_hits = count_hits(&subject, FALLBACK_SUBJECT_TERMS.iter().copied());
    clamp(keyword_hits as f64 * SUBJECT_KEYWORD + fallback_hits as f64 * SUBJECT_FALLBACK)
}

// ── Sender ──────────────────────────────────────────────────────────────

/// `sender_terms` must already be lowercased and distinct.
pub fn sender_score(sender: &str, sender_terms: &[String]) -> f64 {
    let sender = sender.to_lowercase();
    if sender.trim().is_empty() {
        return 0.0;
    }
    let keyword_hits = count_hits(&sender, sender_terms.iter().map(String::as_str));
    let platform_hits = count_hits(&sender, KNOWN_INVOICE_DOMAINS.iter().copied());
    clamp(keyword_hits as f64 * SENDER_KEYWORD + platform_hits as f64 * SENDER_PLATFORM)
}

// ── Content ─────────────────────────────────────────────────────────────

/// Whether `text` carries an amount with a currency mark.
pub(crate) fn has_marked_amount(text: &str) -> bool {
    RE_AMOUNT
        .captures_iter(text)
        .any(|c| c.name("pre").is_some() || c.name("post").is_some())
}

/// `amount_terms` must already be lowercased.
pub fn content_score(body: &str, amount_terms: &[String], company: &CompanyPattern) -> f64 {
    if body.trim().is_empty() {
        return 0.0;
    }
    let mut score = 0.0;
    if RE_INVOICE_NUMBER_LABELED.is_match(body) || RE_INVOICE_NUMBER_TOKEN.is_match(body) {
        score += CONTENT_INVOICE_NUMBER;
    }
    if has_marked_amount(body) {
        score += CONTENT_AMOUNT;
    }
    if RE_TAX_ID.is_match(body) {
        score += CONTENT_TAX_ID;
    }
    if RE_DATE.is_match(body) {
        score += CONTENT_DATE;
    }
    if company.is_match(body) {
        score += CONTENT_COMPANY;
    }
    let lower = body.to_lowercase();
    if count_hits(&lower, amount_terms.iter().map(String::as_str)) > 0 {
        score += CONTENT_AMOUNT_KEYWORD;
    }
    clamp(score)
}

// ── Attachments ─────────────────────────────────────────────────────────

fn single_attachment_score(attachment: &AttachmentMeta) -> f64 {
    let content_type = attachment.content_type.to_lowercase();
    let filename = attachment.filename.to_lowercase();
    let extension = attachment.extension();
    let mut score = 0.0;

    if content_type.contains("pdf") || extension.as_deref() == Some("pdf") {
        score += ATTACHMENT_PDF;
    }
    if count_hits(&filename, INVOICE_FILENAME_TERMS.iter().copied()) > 0 {
        score += ATTACHMENT_NAMED;
    }
    let is_document = extension
        .as_deref()
        .is_some_and(|ext| DOCUMENT_EXTENSIONS.contains(&ext))
        || DOCUMENT_CONTENT_TYPES
            .iter()
            .any(|ct| content_type.contains(ct));
    if is_document {
        score += ATTACHMENT_DOCUMENT;
    }
    score
}

pub fn attachment_score(attachments: &[AttachmentMeta]) -> f64 {
    clamp(attachments.iter().map(single_attachment_score).sum())
}
