//! Gmail API HTTP client
//!
//! Provides the history listing and message fetch calls the sync engine
//! consumes, plus the setup-time push watch registration.
//! Uses synchronous HTTP (ureq) to be executor-agnostic; every request
//! carries a global timeout so no call blocks indefinitely.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::GmailAuth;
use super::api::{GmailMessage, HistoryResponse, WatchRequest, WatchResponse};
use crate::changes::{ChangeBatch, ChangeLog, RemoteError, added_messages, events_from_history};
use crate::models::{Cursor, MessageId};

/// Result of registering a push watch
#[derive(Debug, Clone)]
pub struct WatchRegistration {
    /// Cursor the provider will report changes after
    pub history_id: Cursor,
    /// When the watch lapses and must be renewed
    pub expires_at: Option<DateTime<Utc>>,
}

/// Gmail API client for the inbound relay
pub struct GmailClient {
    auth: GmailAuth,
    agent: ureq::Agent,
    label_filter: Option<String>,
    max_attempts: u32,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Initial backoff between retries; doubled on every attempt
    const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

    /// Create a new Gmail client
    ///
    /// # Arguments
    /// * `auth` - Token source for the mailbox
    /// * `timeout` - Upper bound for each HTTP request, end to end
    pub fn new(auth: GmailAuth, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            auth,
            agent,
            label_filter: None,
            max_attempts: 3,
        }
    }

    /// Only report history for messages carrying this label (e.g. `INBOX`)
    pub fn with_label_filter(mut self, label: Option<String>) -> Self {
        self.label_filter = label.filter(|l| !l.is_empty());
        self
    }

    /// Number of attempts for transient failures (at least one)
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Run the one-time interactive authorization flow
    pub fn authorize(&self) -> Result<()> {
        self.auth.authorize(&self.agent)
    }

    fn access_token(&self) -> Result<String, RemoteError> {
        self.auth
            .access_token(&self.agent)
            .map_err(|e| RemoteError::Unauthorized(format!("{:#}", e)))
    }

    /// GET a JSON document, mapping a 404 to `not_found`
    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        not_found: RemoteError,
    ) -> Result<T, RemoteError> {
        let token = self.access_token()?;

        let mut request = self
            .agent
            .get(url)
            .header("Authorization", &format!("Bearer {}", token));
        for (key, value) in query {
            request = request.query(*key, *value);
        }

        match request.call() {
            Ok(mut response) => response
                .body_mut()
                .read_json::<T>()
                .map_err(|e| RemoteError::Malformed(e.to_string())),
            Err(ureq::Error::StatusCode(404)) => Err(not_found),
            Err(e) => Err(classify(e)),
        }
    }

    // === History API ===

    /// List one page of history since a given historyId
    ///
    /// # Errors
    /// Returns `HistoryExpired` if the history ID is too old (404 from Gmail)
    pub fn list_history(
        &self,
        start_history_id: &Cursor,
        page_token: Option<&str>,
    ) -> Result<HistoryResponse, RemoteError> {
        let url = format!("{}/users/me/history", Self::BASE_URL);

        let mut query = vec![
            ("startHistoryId", start_history_id.as_str()),
            ("historyTypes", "messageAdded"),
        ];
        if let Some(label) = &self.label_filter {
            query.push(("labelId", label.as_str()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        retry_with_backoff(self.max_attempts, Self::RETRY_BASE_DELAY, "history list", || {
            self.get_json(&url, &query, RemoteError::HistoryExpired)
        })
    }

    /// List all history pages since a given historyId
    ///
    /// Automatically handles pagination to fetch all history records.
    pub fn list_history_all(&self, start_history_id: &Cursor) -> Result<HistoryResponse, RemoteError> {
        let mut all_records = Vec::new();
        let mut final_history_id = None;
        let mut page_token = None;

        loop {
            let response = self.list_history(start_history_id, page_token.as_deref())?;

            if let Some(records) = response.history {
                all_records.extend(records);
            }

            if response.history_id.is_some() {
                final_history_id = response.history_id;
            }

            match response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(HistoryResponse {
            history_id: final_history_id,
            history: if all_records.is_empty() {
                None
            } else {
                Some(all_records)
            },
            next_page_token: None,
        })
    }

    /// Get full message details by ID
    pub fn get_message(&self, id: &MessageId) -> Result<GmailMessage, RemoteError> {
        let url = format!("{}/users/me/messages/{}", Self::BASE_URL, id.as_str());

        retry_with_backoff(self.max_attempts, Self::RETRY_BASE_DELAY, "message fetch", || {
            self.get_json(&url, &[("format", "full")], RemoteError::NotFound(id.clone()))
        })
    }

    // === Push notifications (setup time) ===

    /// Register a push watch publishing to a Pub/Sub topic
    ///
    /// The returned history ID is the starting watermark for the relay.
    pub fn watch(&self, topic: &str, label_ids: Vec<String>) -> Result<WatchRegistration> {
        let token = self.access_token()?;
        let url = format!("{}/users/me/watch", Self::BASE_URL);

        let request = WatchRequest {
            topic_name: topic.to_string(),
            label_ids,
        };

        let mut response = self
            .agent
            .post(&url)
            .header("Authorization", &format!("Bearer {}", token))
            .send_json(&request)
            .context("Failed to send watch request")?;

        let watch: WatchResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse watch response")?;

        let expires_at = watch
            .expiration
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        Ok(WatchRegistration {
            history_id: Cursor::new(watch.history_id),
            expires_at,
        })
    }

    /// Stop push notifications for the mailbox
    ///
    /// Returns `false` when there was no active watch to stop.
    pub fn stop_watch(&self) -> Result<bool> {
        let token = self.access_token()?;
        let url = format!("{}/users/me/stop", Self::BASE_URL);

        match self
            .agent
            .post(&url)
            .header("Authorization", &format!("Bearer {}", token))
            .send_empty()
        {
            Ok(_) => Ok(true),
            Err(ureq::Error::StatusCode(404)) => Ok(false),
            Err(e) => Err(anyhow::anyhow!("Failed to stop watch: {}", e)),
        }
    }
}

impl ChangeLog for GmailClient {
    fn list_changes(&self, since: &Cursor) -> Result<ChangeBatch, RemoteError> {
        let response = self.list_history_all(since)?;

        let new_cursor = response
            .history_id
            .map(Cursor::new)
            .ok_or_else(|| RemoteError::Malformed("history response without historyId".into()))?;

        let records = response.history.unwrap_or_default();
        let events = added_messages(events_from_history(&records));
        debug!(
            "History since {}: {} records, {} added messages, now at {}",
            since,
            records.len(),
            events.len(),
            new_cursor
        );

        Ok(ChangeBatch { events, new_cursor })
    }

    fn fetch_message(&self, id: &MessageId) -> Result<GmailMessage, RemoteError> {
        self.get_message(id)
    }
}

/// Map a ureq failure (other than 404) to a remote error kind
fn classify(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::StatusCode(code @ (401 | 403)) => {
            RemoteError::Unauthorized(format!("HTTP {}", code))
        }
        ureq::Error::StatusCode(code) if code == 429 || code >= 500 => {
            RemoteError::Transient(format!("HTTP {}", code))
        }
        ureq::Error::StatusCode(code) => {
            RemoteError::Malformed(format!("unexpected HTTP status {}", code))
        }
        ureq::Error::Timeout(_) => RemoteError::Timeout,
        other => RemoteError::Transient(other.to_string()),
    }
}

/// Run `op`, retrying retryable failures with exponential backoff and jitter
fn retry_with_backoff<T>(
    max_attempts: u32,
    base_delay: Duration,
    what: &str,
    mut op: impl FnMut() -> Result<T, RemoteError>,
) -> Result<T, RemoteError> {
    let mut delay = base_delay;
    let mut attempt = 1;

    loop {
        match op() {
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                warn!("{} failed (attempt {}/{}): {}", what, attempt, max_attempts, e);
                if !delay.is_zero() {
                    std::thread::sleep(delay + Duration::from_millis(rand_jitter()));
                }
                delay *= 2;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Generate a random jitter value (0-100ms)
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}
