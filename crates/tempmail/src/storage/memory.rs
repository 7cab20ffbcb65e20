//! In-memory inbox store
//!
//! Holds the accepted messages for every active address. Mail is volatile
//! by design: a restart leaves every inbox empty (but still active, see
//! [`InboxStore::activate_all`]).

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::{Message, normalize_address};

/// Result of an idempotent insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The message was new and is now at the head of the inbox
    Inserted,
    /// A message with the same ID is already stored; nothing changed
    Duplicate,
    /// No active inbox for the address; the message was dropped
    NotActive,
}

/// Address -> messages, most recent first
///
/// The whole map sits behind one RwLock, so readers always observe a
/// complete list. Addresses are keyed in normalized (lowercase) form,
/// which also makes this the address router: an address is active
/// exactly when it has an inbox here.
#[derive(Default)]
pub struct InboxStore {
    inboxes: RwLock<HashMap<String, Vec<Message>>>,
}

impl InboxStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Message>>> {
        self.inboxes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<Message>>> {
        self.inboxes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty inbox for an address
    ///
    /// Returns `false` if the inbox already existed (its messages are kept).
    pub fn activate(&self, address: &str) -> bool {
        let key = normalize_address(address);
        if key.is_empty() {
            return false;
        }

        let mut inboxes = self.write();
        if inboxes.contains_key(&key) {
            return false;
        }
        inboxes.insert(key, Vec::new());
        true
    }

    /// Activate every address in `addresses`, returning how many were new
    pub fn activate_all<'a>(&self, addresses: impl IntoIterator<Item = &'a str>) -> usize {
        addresses
            .into_iter()
            .filter(|address| self.activate(address))
            .count()
    }

    /// Clear and remove an inbox
    ///
    /// Returns the number of messages discarded, or `None` if the address
    /// had no inbox.
    pub fn retire(&self, address: &str) -> Option<usize> {
        self.write()
            .remove(&normalize_address(address))
            .map(|messages| messages.len())
    }

    /// Whether mail for this address is currently accepted
    pub fn is_active(&self, address: &str) -> bool {
        self.read().contains_key(&normalize_address(address))
    }

    /// Insert a message at the head of an inbox, unless already present
    pub fn insert(&self, address: &str, message: Message) -> InsertOutcome {
        let key = normalize_address(address);
        let mut inboxes = self.write();

        let Some(inbox) = inboxes.get_mut(&key) else {
            return InsertOutcome::NotActive;
        };

        if inbox.iter().any(|existing| existing.id == message.id) {
            return InsertOutcome::Duplicate;
        }

        inbox.insert(0, message);
        InsertOutcome::Inserted
    }

    /// Snapshot of an inbox, most recent first; empty if not tracked
    pub fn list(&self, address: &str) -> Vec<Message> {
        self.read()
            .get(&normalize_address(address))
            .cloned()
            .unwrap_or_default()
    }

    /// Addresses with an active inbox, sorted
    pub fn active_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.read().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Total number of stored messages across all inboxes
    pub fn message_count(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }
}
