//! Gmail API response normalization
//!
//! Converts a full Gmail message into the flat [`Message`] the relay stores.
//! The MIME structure is first lifted into a [`BodyPart`] tree so body
//! selection is a single pure traversal over an explicit type.

use base64::prelude::*;
use chrono::{DateTime, TimeZone, Utc};

use super::api::{GmailMessage, Header, MessagePart};
use crate::models::{EmailAddress, Message, MessageId};

/// A node of a message's MIME tree
#[derive(Debug, Clone, PartialEq)]
pub enum BodyPart {
    /// Single-part content with an optional base64url payload
    Leaf {
        mime_type: String,
        data: Option<String>,
    },
    /// `multipart/*` container
    Composite {
        mime_type: String,
        children: Vec<BodyPart>,
    },
}

impl BodyPart {
    /// Build the tree from a Gmail message part (or payload)
    ///
    /// Named attachments become payload-less leaves: they never supply
    /// the displayed body.
    pub fn from_api(part: &MessagePart) -> Self {
        let mime_type = part
            .mime_type
            .as_deref()
            .unwrap_or_default()
            .to_ascii_lowercase();

        match &part.parts {
            Some(children) if !children.is_empty() => BodyPart::Composite {
                mime_type,
                children: children.iter().map(BodyPart::from_api).collect(),
            },
            _ => {
                let is_attachment = part.filename.as_deref().is_some_and(|f| !f.is_empty());
                let data = if is_attachment {
                    None
                } else {
                    part.body.as_ref().and_then(|b| b.data.clone())
                };
                BodyPart::Leaf { mime_type, data }
            }
        }
    }

    pub fn mime_type(&self) -> &str {
        match self {
            BodyPart::Leaf { mime_type, .. } | BodyPart::Composite { mime_type, .. } => mime_type,
        }
    }

    fn is_html(&self) -> bool {
        self.mime_type().starts_with("text/html")
    }
}

/// Find the displayable body in a MIME tree
///
/// Depth-first, left to right; the first non-empty decoded payload wins.
/// Inside `multipart/alternative` the HTML child is tried first and the
/// sibling order is only used when it yields nothing.
pub fn extract_body(part: &BodyPart) -> String {
    match part {
        BodyPart::Leaf { data, .. } => data
            .as_deref()
            .and_then(decode_base64_body)
            .unwrap_or_default(),
        BodyPart::Composite {
            mime_type,
            children,
        } => {
            if mime_type.starts_with("multipart/alternative")
                && let Some(html) = children.iter().find(|c| c.is_html())
            {
                let body = extract_body(html);
                if !body.is_empty() {
                    return body;
                }
            }

            children
                .iter()
                .map(extract_body)
                .find(|body| !body.is_empty())
                .unwrap_or_default()
        }
    }
}

/// Normalize a Gmail API message to a relay Message
///
/// Returns `None` when no recipient can be determined; such a message
/// cannot be routed to any inbox.
pub fn normalize_message(gmail_msg: &GmailMessage) -> Option<Message> {
    let payload = gmail_msg.payload.as_ref()?;
    let headers = payload.headers.as_deref().unwrap_or_default();

    let recipient = extract_recipient(headers)?;

    let received_at = received_at(gmail_msg.internal_date.as_deref(), header(headers, "Date"));
    let body = extract_body(&BodyPart::from_api(payload));

    Some(
        Message::builder(MessageId::new(&gmail_msg.id))
            .recipient(&recipient.email)
            .sender(header(headers, "From"))
            .subject(header(headers, "Subject"))
            .body(body)
            .received_at(received_at)
            .build(),
    )
}

/// Case-insensitive header lookup; missing headers read as empty
fn header<'a>(headers: &'a [Header], name: &str) -> &'a str {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
        .unwrap_or_default()
}

/// Address the message was actually delivered to
///
/// `Delivered-To` names the alias that received the copy; `To` may list
/// several recipients, so it is only a fallback (first entry).
fn extract_recipient(headers: &[Header]) -> Option<EmailAddress> {
    ["Delivered-To", "To"].iter().find_map(|name| {
        EmailAddress::parse_list(header(headers, name))
            .into_iter()
            .find(|addr| !addr.normalized().is_empty())
    })
}

/// Provider receive time, falling back to the Date header, then to now
fn received_at(internal_date: Option<&str>, date_header: &str) -> DateTime<Utc> {
    internal_date
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .or_else(|| {
            DateTime::parse_from_rfc2822(date_header.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .unwrap_or_else(Utc::now)
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
/// Bytes that are not valid UTF-8 are decoded lossily rather than dropped.
fn decode_base64_body(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    decoders
        .iter()
        .find_map(|decoder| decoder.decode(data.trim()).ok())
        .map(|bytes| match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
}
