//! Notification fan-out to live subscribers
//!
//! Backed by a tokio broadcast channel: `publish` never blocks, each
//! subscriber has its own bounded backlog, and a subscriber that falls too
//! far behind observes a lag instead of slowing anyone else down. New
//! subscribers only see events published after they subscribed.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::Message;

/// Backlog each subscriber may accumulate before it starts lagging
pub const DEFAULT_CAPACITY: usize = 256;

/// Event pushed to live clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboxEvent {
    /// Greeting sent once when a client connects
    Connected,
    /// A message was accepted into an inbox
    NewMail { message: Message },
}

impl InboxEvent {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Cloneable publishing handle
#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<InboxEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<InboxEvent> {
        self.sender.subscribe()
    }

    /// Deliver an event to every current subscriber
    ///
    /// Returns how many subscribers it was queued for. Having nobody
    /// listening is normal and not an error.
    pub fn publish(&self, event: InboxEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                log::debug!("No live subscribers; event dropped");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
