//! Invoice field extraction: number, amount, currency, date and issuer.
//!
//! Runs only on messages already classified as invoices. Every field is
//! independent; a missing one never blocks the others.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::mail::message::CanonicalMessage;

use super::patterns::{
    CompanyPattern, RE_AMOUNT, RE_DATE, RE_INVOICE_NUMBER_LABELED, RE_INVOICE_NUMBER_TOKEN,
};

/// Accepted invoice date formats, tried in order.
pub const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y年%m月%d日", "%Y.%m.%d"];

/// How far after an amount keyword (in bytes) an amount may appear.
const AMOUNT_WINDOW: usize = 48;

/// Fields pulled out of an invoice message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceInfo {
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
}

impl InvoiceInfo {
    pub fn is_empty(&self) -> bool {
        self.invoice_number.is_none()
            && self.amount.is_none()
            && self.invoice_date.is_none()
            && self.issuer.is_none()
    }
}

/// Extract what can be found from subject and body.
pub fn extract_info(
    message: &CanonicalMessage,
    amount_terms: &[String],
    company: &CompanyPattern,
    default_currency: &str,
) -> InvoiceInfo {
    let text = format!("{}\n{}", message.subject, message.body);
    let amount = extract_amount(&text, amount_terms);
    InvoiceInfo {
        invoice_number: extract_invoice_number(&text),
        currency: amount.as_ref().map(|(_, marker)| {
            marker
                .as_deref()
                .and_then(currency_for_marker)
                .unwrap_or(default_currency)
                .to_string()
        }),
        amount: amount.map(|(value, _)| value),
        invoice_date: extract_date(&text),
        issuer: company.find(&text).map(str::to_string),
    }
}

pub fn extract_invoice_number(text: &str) -> Option<String> {
    RE_INVOICE_NUMBER_LABELED
        .captures(text)
        .or_else(|| RE_INVOICE_NUMBER_TOKEN.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end_matches('-').to_uppercase())
}

/// First parseable date in any accepted format.
pub fn extract_date(text: &str) -> Option<NaiveDate> {
    RE_DATE
        .find_iter(text)
        .find_map(|m| parse_date(m.as_str()))
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// An amount and the currency marker found with it.
///
/// Prefers the amount closest after an amount keyword, then the first amount
/// carrying a currency mark anywhere in the text.
pub fn extract_amount(text: &str, amount_terms: &[String]) -> Option<(f64, Option<String>)> {
    let lower = text.to_lowercase();

    let mut best: Option<(usize, f64, Option<String>)> = None;
    for term in amount_terms.iter().filter(|t| !t.is_empty()) {
        for (pos, _) in lower.match_indices(term.as_str()) {
            let start = pos + term.len();
            let window = &lower[start..floor_char_boundary(&lower, start + AMOUNT_WINDOW)];
            if let Some((offset, value, marker)) = amount_in_window(window) {
                if best.as_ref().is_none_or(|(d, _, _)| offset < *d) {
                    best = Some((offset, value, marker));
                }
            }
        }
    }
    if let Some((_, value, marker)) = best {
        return Some((value, marker));
    }

    RE_AMOUNT.captures_iter(&lower).find_map(|caps| {
        let marker = caps.name("pre").or_else(|| caps.name("post"))?;
        let value = parse_number(caps.name("num")?.as_str())?;
        Some((value, Some(marker.as_str().to_string())))
    })
}

/// Within a keyword window: the first marked amount, else the first decimal.
fn amount_in_window(window: &str) -> Option<(usize, f64, Option<String>)> {
    let mut decimal = None;
    for caps in RE_AMOUNT.captures_iter(window) {
        let Some(num) = caps.name("num") else { continue };
        let Some(value) = parse_number(num.as_str()) else { continue };
        let marker = caps.name("pre").or_else(|| caps.name("post"));
        if let Some(marker) = marker {
            return Some((num.start(), value, Some(marker.as_str().to_string())));
        }
        if decimal.is_none() && num.as_str().contains('.') {
            decimal = Some((num.start(), value, None));
        }
    }
    decimal
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Map a currency symbol or code to an ISO code.
pub fn currency_for_marker(marker: &str) -> Option<&'static str> {
    match marker.trim().to_ascii_uppercase().as_str() {
        "¥" | "￥" | "元" | "CNY" | "RMB" => Some("CNY"),
        "$" | "USD" => Some("USD"),
        "€" | "EUR" => Some("EUR"),
        "£" | "GBP" => Some("GBP"),
        _ => None,
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::keywords::KeywordConfiguration;

    fn amount_terms() -> Vec<String> {
        KeywordConfiguration::default().amount_terms()
    }

    #[test]
    fn dates_in_all_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 6, 8);
        for text in [
            "开票日期 2025-06-08",
            "date: 2025/06/08",
            "2025年6月8日开具",
            "on 2025.06.08",
        ] {
            assert_eq!(extract_date(text), expected, "{text}");
        }
        assert_eq!(extract_date("2025-13-45 and 2025/06/08"), expected);
        assert!(extract_date("no date").is_none());
    }

    #[test]
    fn amount_prefers_keyword_neighbourhood() {
        let text = "Order #12, 3 items at $5.00 each. Amount due: $15.00";
        let (value, marker) = extract_amount(text, &amount_terms()).unwrap();
        // "amount" precedes "$15.00" more closely than anything else.
        assert_eq!(value, 15.0);
        assert_eq!(marker.as_deref(), Some("$"));
    }

    #[test]
    fn amount_falls_back_to_first_marked() {
        let (value, marker) = extract_amount("Paid ¥1,250.50 yesterday", &[]).unwrap();
        assert_eq!(value, 1250.5);
        assert_eq!(currency_for_marker(marker.as_deref().unwrap()), Some("CNY"));
        assert!(extract_amount("call 555 1234", &[]).is_none());
    }

    #[test]
    fn chinese_total() {
        let (value, marker) = extract_amount("价税合计：1,060.00元", &amount_terms()).unwrap();
        assert_eq!(value, 1060.0);
        assert_eq!(marker.as_deref(), Some("元"));
    }

    #[test]
    fn unmarked_amount_gets_default_currency() {
        let company = CompanyPattern::compile(&[]).unwrap();
        let message = CanonicalMessage {
            subject: "Invoice INV-2025-001".to_string(),
            body: "Total: 99.90".to_string(),
            ..serde_json::from_str("{}").unwrap()
        };
        let info = extract_info(&message, &amount_terms(), &company, "CNY");
        assert_eq!(info.invoice_number.as_deref(), Some("INV-2025-001"));
        assert_eq!(info.amount, Some(99.9));
        assert_eq!(info.currency.as_deref(), Some("CNY"));
        assert!(info.issuer.is_none());
    }

    #[test]
    fn no_amount_means_no_currency() {
        let company = CompanyPattern::compile(&[]).unwrap();
        let message: CanonicalMessage =
            serde_json::from_str(r#"{"subject":"发票","body":"请查收"}"#).unwrap();
        let info = extract_info(&message, &amount_terms(), &company, "CNY");
        assert!(info.currency.is_none());
        assert!(info.is_empty());
    }
}
