//! Message model representing a normalized inbound email

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subject used when a message carries no Subject header
pub const DEFAULT_SUBJECT: &str = "No Subject";

/// Unique identifier for a message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Parse an email address from a string like "John Doe <john@example.com>"
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        // Try to parse "Name <email>" format
        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim().trim_matches('"').trim();
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                },
                email: email.to_string(),
            };
        }

        // Otherwise, treat the whole string as an email
        Self {
            name: None,
            email: s.to_string(),
        }
    }

    /// Parse a comma-separated address list.
    ///
    /// Commas inside quoted display names or angle brackets do not split.
    pub fn parse_list(s: &str) -> Vec<Self> {
        let mut entries = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut in_angle = false;

        for c in s.chars() {
            match c {
                '"' => in_quotes = !in_quotes,
                '<' if !in_quotes => in_angle = true,
                '>' if !in_quotes => in_angle = false,
                ',' if !in_quotes && !in_angle => {
                    entries.push(std::mem::take(&mut current));
                    continue;
                }
                _ => {}
            }
            current.push(c);
        }
        entries.push(current);

        entries
            .iter()
            .map(|entry| entry.trim())
            .filter(|entry| !entry.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// The address part, trimmed and lowercased, as used for inbox keys
    pub fn normalized(&self) -> String {
        self.email.trim().to_lowercase()
    }
}

/// Normalize a raw address string to its inbox key form
pub fn normalize_address(raw: &str) -> String {
    EmailAddress::parse(raw).normalized()
}

/// A single accepted inbound message
///
/// Immutable once built. Serialized in camelCase because this is the shape
/// the inbox endpoint and the live channel hand to web clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Gmail message ID
    pub id: MessageId,
    /// Address the message was delivered to (lowercase, no angle brackets)
    pub recipient_address: String,
    /// Raw From header
    pub sender: String,
    /// Subject line, defaulted when absent
    pub subject: String,
    /// Decoded body, HTML preferred over plain text
    pub body: String,
    /// When the provider received the message
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Create a new message builder
    pub fn builder(id: MessageId) -> MessageBuilder {
        MessageBuilder::new(id)
    }
}

/// Builder for creating Message instances
pub struct MessageBuilder {
    id: MessageId,
    recipient_address: String,
    sender: String,
    subject: String,
    body: String,
    received_at: Option<DateTime<Utc>>,
}

impl MessageBuilder {
    fn new(id: MessageId) -> Self {
        Self {
            id,
            recipient_address: String::new(),
            sender: String::new(),
            subject: String::new(),
            body: String::new(),
            received_at: None,
        }
    }

    pub fn recipient(mut self, address: &str) -> Self {
        self.recipient_address = normalize_address(address);
        self
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: self.id,
            recipient_address: self.recipient_address,
            sender: self.sender,
            subject: if self.subject.trim().is_empty() {
                DEFAULT_SUBJECT.to_string()
            } else {
                self.subject
            },
            body: self.body,
            received_at: self.received_at.unwrap_or_else(Utc::now),
        }
    }
}
