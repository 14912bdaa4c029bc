//! Raw MIME bytes → [`CanonicalMessage`] via `mail-parser`.

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use tracing::debug;

use super::access::Protocol;
use super::error::{MailError, MailResult};
use super::message::{AttachmentMeta, CanonicalMessage, new_message_id, positional_message_id};
use super::transport::RawEmail;

/// Maximum body text kept per message (64 KB).
const MAX_BODY_TEXT: usize = 64 * 1024;

/// Parse one raw message into the canonical model.
///
/// Plain text is preferred; `mail-parser` converts an HTML-only body to text.
/// Attachments larger than `max_attachment_bytes` keep their metadata but
/// lose their content.
pub fn normalize(
    raw: &RawEmail,
    protocol: Protocol,
    max_attachment_bytes: usize,
) -> MailResult<CanonicalMessage> {
    if raw.data.iter().all(u8::is_ascii_whitespace) {
        return Err(MailError::Parse {
            message: format!("message {} is empty", raw.native_id),
        });
    }
    let message = MessageParser::default()
        .parse(&raw.data)
        .ok_or_else(|| MailError::Parse {
            message: format!(
                "failed to parse MIME message (id: {}, {} bytes)",
                raw.native_id,
                raw.data.len()
            ),
        })?;

    let message_id = message
        .message_id()
        .map(|id| format!("<{id}>"))
        .unwrap_or_else(|| positional_message_id(protocol, &raw.native_id));

    let sender = message
        .from()
        .and_then(|addr| addr.first())
        .map(|a| match (a.name(), a.address()) {
            (Some(name), Some(address)) => format!("{name} <{address}>"),
            (None, Some(address)) => address.to_string(),
            (Some(name), None) => name.to_string(),
            (None, None) => String::new(),
        })
        .unwrap_or_default();

    let recipient = message
        .to()
        .map(|addr| {
            addr.iter()
                .filter_map(|a| a.address())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();

    let timestamp = message
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        .or(raw.internal_date)
        .unwrap_or_else(|| {
            debug!(native_id = %raw.native_id, "no usable date, timestamping with fetch time");
            Utc::now()
        });

    let body = message
        .body_text(0)
        .map(|text| truncate(text.trim(), MAX_BODY_TEXT))
        .unwrap_or_default();

    let attachments: Vec<AttachmentMeta> = message
        .attachments()
        .map(|part| {
            let contents = part.contents();
            let content_type = part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string())
                .to_ascii_lowercase();
            AttachmentMeta {
                filename: part.attachment_name().unwrap_or_default().to_string(),
                content_type,
                size: contents.len(),
                content: (contents.len() <= max_attachment_bytes).then(|| contents.to_vec()),
            }
        })
        .collect();

    Ok(CanonicalMessage {
        id: new_message_id(),
        native_id: raw.native_id.clone(),
        message_id,
        sender,
        recipient,
        subject: message.subject().unwrap_or_default().trim().to_string(),
        body,
        timestamp,
        has_attachments: !attachments.is_empty(),
        attachments,
        is_invoice: false,
        created_at: Utc::now(),
    })
}

/// Truncate to at most `max_bytes` bytes on a char boundary.
fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(id: &str, text: &str) -> RawEmail {
        RawEmail {
            native_id: id.to_string(),
            data: text.as_bytes().to_vec(),
            size: Some(text.len()),
            internal_date: None,
        }
    }

    const SIMPLE: &str = "\
From: Billing Team <billing@example.com>\r\n\
To: Alice <alice@example.com>, bob@example.com\r\n\
Subject: Your invoice INV-2025-001\r\n\
Message-ID: <inv-001@example.com>\r\n\
Date: Sun, 08 Jun 2025 22:30:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Amount due: $1,250.00\r\n";

    const WITH_PDF: &str = "\
From: billing@example.com\r\n\
To: alice@example.com\r\n\
Subject: =?UTF-8?B?5Y+R56Wo?=\r\n\
Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Please find the <b>invoice</b> attached.</p>\r\n\
--b1\r\n\
Content-Type: application/pdf; name=\"invoice.pdf\"\r\n\
Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQKJcfsj6IK\r\n\
--b1--\r\n";

    #[test]
    fn simple_message_fields() {
        let msg = normalize(&raw("42", SIMPLE), Protocol::Imap, 1024).unwrap();
        assert_eq!(msg.native_id, "42");
        assert_eq!(msg.message_id, "<inv-001@example.com>");
        assert_eq!(msg.sender, "Billing Team <billing@example.com>");
        assert_eq!(msg.recipient, "alice@example.com, bob@example.com");
        assert_eq!(msg.subject, "Your invoice INV-2025-001");
        assert!(msg.body.contains("$1,250.00"));
        assert_eq!(
            msg.timestamp,
            Utc.with_ymd_and_hms(2025, 6, 8, 22, 30, 0).unwrap()
        );
        assert!(!msg.has_attachments);
    }

    #[test]
    fn html_only_body_and_pdf_attachment() {
        let msg = normalize(&raw("7", WITH_PDF), Protocol::Pop3, 1024).unwrap();
        assert_eq!(msg.subject, "发票");
        assert!(msg.body.contains("invoice"));
        assert!(!msg.body.contains("<b>"));
        assert_eq!(msg.message_id, "<pop3-7@invoice-radar>");
        assert!(msg.has_attachments);
        let att = &msg.attachments[0];
        assert_eq!(att.filename, "invoice.pdf");
        assert_eq!(att.content_type, "application/pdf");
        assert!(att.content.as_ref().unwrap().starts_with(b"%PDF"));
    }

    #[test]
    fn oversized_attachment_keeps_metadata_only() {
        let msg = normalize(&raw("7", WITH_PDF), Protocol::Imap, 4).unwrap();
        let att = &msg.attachments[0];
        assert!(att.size > 4);
        assert!(att.content.is_none());
        assert!(msg.has_attachments);
    }

    #[test]
    fn missing_date_falls_back_to_internal_date() {
        let internal = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let mut r = raw("1", "Subject: no date\r\n\r\nhello\r\n");
        r.internal_date = Some(internal);
        let msg = normalize(&r, Protocol::Imap, 1024).unwrap();
        assert_eq!(msg.timestamp, internal);
    }

    #[test]
    fn undated_message_is_stamped_with_fetch_time() {
        let before = Utc::now();
        let msg = normalize(&raw("3", "Subject: undated\r\n\r\nhello\r\n"), Protocol::Pop3, 1024).unwrap();
        assert!(msg.timestamp >= before);
        assert!(msg.timestamp <= Utc::now());
    }

    #[test]
    fn empty_bytes_are_a_parse_error() {
        let err = normalize(&raw("9", ""), Protocol::Imap, 1024).unwrap_err();
        assert!(matches!(err, MailError::Parse { .. }));
    }

    #[test]
    fn truncate_respects_char_boundary() {
        assert_eq!(truncate("发票发票", 4), "发");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
