//! Raw provider message → decoded parts.
//!
//! Extracts the `Subject`, `From`, and `Date` headers and decodes the body by
//! walking MIME parts: `text/plain` is preferred; `text/html` is a fallback
//! with tags stripped and the result truncated to 2 000 chars.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use crate::mailbox::client::{MessagePart, RawMessage};
use crate::models::EmailMessage;

const HTML_BODY_MAX_CHARS: usize = 2000;

static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message {0} has no payload")]
    MissingPayload(String),
    #[error("message {0} body is not valid base64")]
    BadBodyEncoding(String),
}

fn header_value<'a>(part: &'a MessagePart, name: &str) -> Option<&'a str> {
    part.headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

fn decode_base64url(data: &str, message_id: &str) -> Result<String, DecodeError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|_| DecodeError::BadBodyEncoding(message_id.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn strip_html(raw: &str) -> String {
    let stripped = HTML_TAG_RE.replace_all(raw, " ");
    stripped.chars().take(HTML_BODY_MAX_CHARS).collect()
}

fn find_part<'a>(part: &'a MessagePart, mime: &str) -> Option<&'a MessagePart> {
    if part.mime_type.as_deref() == Some(mime) && part.body.data.is_some() {
        return Some(part);
    }
    part.parts.iter().find_map(|p| find_part(p, mime))
}

fn decode_body(payload: &MessagePart, message_id: &str) -> Result<String, DecodeError> {
    // Single-part message: the payload carries the body directly.
    if let Some(data) = &payload.body.data {
        return decode_base64url(data, message_id);
    }

    if let Some(plain) = find_part(payload, "text/plain") {
        if let Some(data) = &plain.body.data {
            return decode_base64url(data, message_id);
        }
    }

    if let Some(html) = find_part(payload, "text/html") {
        if let Some(data) = &html.body.data {
            return Ok(strip_html(&decode_base64url(data, message_id)?));
        }
    }

    Ok(String::new())
}

fn parse_received(raw_date: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw_date?.trim();
    if raw.is_empty() {
        return None;
    }
    match dateparser::parse(raw) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(err) => {
            log::debug!("unparseable Date header `{}`: {}", raw, err);
            None
        }
    }
}

/// Decode a full-format provider message into pipeline input.
pub fn decode_message(raw: &RawMessage) -> Result<EmailMessage, DecodeError> {
    let payload = raw
        .payload
        .as_ref()
        .ok_or_else(|| DecodeError::MissingPayload(raw.id.clone()))?;

    let subject = header_value(payload, "Subject").unwrap_or_default().to_string();
    let sender = header_value(payload, "From").unwrap_or_default().to_string();
    let received = parse_received(header_value(payload, "Date"));
    let body = decode_body(payload, &raw.id)?;

    Ok(EmailMessage {
        message_id: raw.id.clone(),
        subject,
        sender,
        body,
        received,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::client::{Header, MessageBody};
    use base64::engine::general_purpose::URL_SAFE;

    fn b64(text: &str) -> String {
        URL_SAFE.encode(text.as_bytes())
    }

    fn headers(subject: &str, from: &str, date: &str) -> Vec<Header> {
        vec![
            Header { name: "Subject".into(), value: subject.into() },
            Header { name: "From".into(), value: from.into() },
            Header { name: "Date".into(), value: date.into() },
        ]
    }

    fn raw_with_payload(payload: MessagePart) -> RawMessage {
        RawMessage {
            id: "msg-1".into(),
            payload: Some(payload),
        }
    }

    #[test]
    fn decodes_single_part_plain_message() {
        let raw = raw_with_payload(MessagePart {
            mime_type: Some("text/plain".into()),
            headers: headers(
                "Thanks for applying",
                "careers@acme.com",
                "Tue, 01 Jul 2025 09:30:00 +0000",
            ),
            body: MessageBody { data: Some(b64("Thank you for applying.")) },
            parts: vec![],
        });

        let decoded = decode_message(&raw).unwrap();
        assert_eq!(decoded.message_id, "msg-1");
        assert_eq!(decoded.subject, "Thanks for applying");
        assert_eq!(decoded.sender, "careers@acme.com");
        assert_eq!(decoded.body, "Thank you for applying.");
        assert!(decoded.received.is_some());
    }

    #[test]
    fn prefers_text_plain_over_html_part() {
        let raw = raw_with_payload(MessagePart {
            mime_type: Some("multipart/alternative".into()),
            headers: headers("S", "f@x.com", "Tue, 01 Jul 2025 09:30:00 +0000"),
            body: MessageBody::default(),
            parts: vec![
                MessagePart {
                    mime_type: Some("text/html".into()),
                    body: MessageBody { data: Some(b64("<b>html body</b>")) },
                    ..Default::default()
                },
                MessagePart {
                    mime_type: Some("text/plain".into()),
                    body: MessageBody { data: Some(b64("plain body")) },
                    ..Default::default()
                },
            ],
        });

        assert_eq!(decode_message(&raw).unwrap().body, "plain body");
    }

    #[test]
    fn html_fallback_strips_tags_and_truncates() {
        let long_html = format!("<div>{}</div>", "word ".repeat(1000));
        let raw = raw_with_payload(MessagePart {
            mime_type: Some("multipart/alternative".into()),
            headers: headers("S", "f@x.com", "Tue, 01 Jul 2025 09:30:00 +0000"),
            body: MessageBody::default(),
            parts: vec![MessagePart {
                mime_type: Some("text/html".into()),
                body: MessageBody { data: Some(b64(&long_html)) },
                ..Default::default()
            }],
        });

        let body = decode_message(&raw).unwrap().body;
        assert!(!body.contains('<'));
        assert!(body.chars().count() <= 2000);
    }

    #[test]
    fn nested_multipart_is_searched_recursively() {
        let raw = raw_with_payload(MessagePart {
            mime_type: Some("multipart/mixed".into()),
            headers: headers("S", "f@x.com", "Tue, 01 Jul 2025 09:30:00 +0000"),
            body: MessageBody::default(),
            parts: vec![MessagePart {
                mime_type: Some("multipart/alternative".into()),
                parts: vec![MessagePart {
                    mime_type: Some("text/plain".into()),
                    body: MessageBody { data: Some(b64("nested body")) },
                    ..Default::default()
                }],
                ..Default::default()
            }],
        });

        assert_eq!(decode_message(&raw).unwrap().body, "nested body");
    }

    #[test]
    fn missing_payload_is_an_error() {
        let raw = RawMessage { id: "m".into(), payload: None };
        assert!(matches!(
            decode_message(&raw),
            Err(DecodeError::MissingPayload(_))
        ));
    }

    #[test]
    fn bad_date_header_yields_none_received() {
        let raw = raw_with_payload(MessagePart {
            mime_type: Some("text/plain".into()),
            headers: headers("S", "f@x.com", "not a date"),
            body: MessageBody { data: Some(b64("body")) },
            parts: vec![],
        });
        assert!(decode_message(&raw).unwrap().received.is_none());
    }

    #[test]
    fn unpadded_base64url_decodes() {
        let data = URL_SAFE_NO_PAD.encode("unpadded body".as_bytes());
        let raw = raw_with_payload(MessagePart {
            mime_type: Some("text/plain".into()),
            headers: headers("S", "f@x.com", "Tue, 01 Jul 2025 09:30:00 +0000"),
            body: MessageBody { data: Some(data) },
            parts: vec![],
        });
        assert_eq!(decode_message(&raw).unwrap().body, "unpadded body");
    }
}
