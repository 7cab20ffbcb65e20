//! Gmail API integration
//!
//! This module provides:
//! - OAuth2 token management (and the one-time authorization flow)
//! - Gmail API client for history listing, message fetch and push watches
//! - Response normalization to domain models

mod auth;
mod client;
mod normalize;

pub use auth::GmailAuth;
pub use client::{GmailClient, WatchRegistration};
pub use normalize::{BodyPart, extract_body, normalize_message};

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Reference to a message inside a history record
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        #[serde(default)]
        pub thread_id: Option<String>,
        #[serde(default)]
        pub label_ids: Option<Vec<String>>,
    }

    /// Wrapper used by every history change kind
    #[derive(Debug, Clone, Deserialize)]
    pub struct HistoryMessageChange {
        pub message: MessageRef,
    }

    /// One entry of `users.history.list`
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: String,
        pub messages_added: Option<Vec<HistoryMessageChange>>,
        pub messages_deleted: Option<Vec<HistoryMessageChange>>,
        pub labels_added: Option<Vec<HistoryMessageChange>>,
        pub labels_removed: Option<Vec<HistoryMessageChange>>,
    }

    /// Response from `users.history.list`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub next_page_token: Option<String>,
        pub history_id: Option<String>,
    }

    /// Request body for `users.watch`
    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WatchRequest {
        pub topic_name: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        pub label_ids: Vec<String>,
    }

    /// Response from `users.watch`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WatchResponse {
        pub history_id: String,
        /// Expiration in milliseconds since epoch, encoded as a string
        pub expiration: Option<String>,
    }

    /// Full message from Gmail API
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        #[serde(default)]
        pub thread_id: Option<String>,
        pub label_ids: Option<Vec<String>>,
        #[serde(default)]
        pub snippet: String,
        #[serde(default)]
        pub internal_date: Option<String>,
        pub payload: Option<MessagePart>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Clone, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Message body (may be base64 encoded)
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageBody {
        pub size: Option<u32>,
        pub data: Option<String>,
        pub attachment_id: Option<String>,
    }

    /// Message part; the top-level payload is a part as well
    #[derive(Debug, Clone, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }
}
