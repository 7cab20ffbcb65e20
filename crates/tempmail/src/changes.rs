//! Change-log seam between the sync engine and the mail provider
//!
//! The engine only ever talks to a [`ChangeLog`]; [`GmailClient`](crate::GmailClient)
//! is the production implementation and tests substitute in-memory fakes.

use crate::gmail::api::{GmailMessage, HistoryRecord};
use crate::models::{Cursor, MessageId};

/// Failure talking to the remote change log
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The message was deleted (or never visible) between notification and fetch
    #[error("message {0} not found")]
    NotFound(MessageId),
    /// The start cursor is older than the provider keeps history for
    #[error("history cursor expired or invalid; re-seed the watermark with `relay watch`")]
    HistoryExpired,
    /// No usable credentials, or the provider rejected them
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("request timed out")]
    Timeout,
    /// Network failure, rate limit or provider-side error
    #[error("transient remote failure: {0}")]
    Transient(String),
    /// The provider answered with something we could not interpret
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// Whether repeating the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Timeout | RemoteError::Transient(_))
    }
}

/// Kind of provider-reported mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    MessageAdded,
    MessageDeleted,
    LabelAdded,
    LabelRemoved,
}

/// A single change reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub message_id: MessageId,
}

impl ChangeEvent {
    pub fn message_added(id: impl Into<MessageId>) -> Self {
        Self {
            kind: ChangeKind::MessageAdded,
            message_id: id.into(),
        }
    }
}

/// Result of a change-log query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    /// "Message added" events in provider order, each message at most once
    pub events: Vec<ChangeEvent>,
    /// Cursor to persist once every event has been processed
    pub new_cursor: Cursor,
}

impl ChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Remote incremental-history API
pub trait ChangeLog: Send + Sync {
    /// List "message added" changes after `since`, across all pages
    fn list_changes(&self, since: &Cursor) -> Result<ChangeBatch, RemoteError>;

    /// Fetch the full provider representation of one message
    fn fetch_message(&self, id: &MessageId) -> Result<GmailMessage, RemoteError>;
}

/// Flatten history records into change events, in record order
pub fn events_from_history(records: &[HistoryRecord]) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    for record in records {
        let groups = [
            (ChangeKind::MessageAdded, &record.messages_added),
            (ChangeKind::MessageDeleted, &record.messages_deleted),
            (ChangeKind::LabelAdded, &record.labels_added),
            (ChangeKind::LabelRemoved, &record.labels_removed),
        ];

        for (kind, changes) in groups {
            for change in changes.iter().flatten() {
                events.push(ChangeEvent {
                    kind,
                    message_id: MessageId::new(&change.message.id),
                });
            }
        }
    }

    events
}

/// Keep only "message added" events, dropping repeats of the same message
///
/// Gmail can report the same message in several history records (for
/// example once per label it lands in); the first occurrence wins.
pub fn added_messages(events: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
    let mut seen = std::collections::HashSet::new();
    events
        .into_iter()
        .filter(|e| e.kind == ChangeKind::MessageAdded)
        .filter(|e| seen.insert(e.message_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_records(json: &str) -> Vec<HistoryRecord> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_events_from_history_keeps_order() {
        let records = parse_records(
            r#"[
                {"id": "101", "messagesAdded": [{"message": {"id": "m1", "threadId": "t1"}}]},
                {"id": "102", "labelsAdded": [{"message": {"id": "m1"}, "labelIds": ["STARRED"]}]},
                {"id": "103", "messagesAdded": [{"message": {"id": "m2"}}, {"message": {"id": "m3"}}]}
            ]"#,
        );

        let events = events_from_history(&records);
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], ChangeEvent::message_added("m1"));
        assert_eq!(events[1].kind, ChangeKind::LabelAdded);
        assert_eq!(events[3], ChangeEvent::message_added("m3"));
    }

    #[test]
    fn test_added_messages_filters_and_dedupes() {
        let events = vec![
            ChangeEvent::message_added("m1"),
            ChangeEvent {
                kind: ChangeKind::MessageDeleted,
                message_id: MessageId::new("m0"),
            },
            ChangeEvent::message_added("m2"),
            ChangeEvent::message_added("m1"),
        ];

        let added = added_messages(events);
        let ids: Vec<&str> = added.iter().map(|e| e.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::Transient("503".into()).is_retryable());
        assert!(!RemoteError::NotFound(MessageId::new("m1")).is_retryable());
        assert!(!RemoteError::HistoryExpired.is_retryable());
        assert!(!RemoteError::Unauthorized("no token".into()).is_retryable());
    }
}
