//! Tempmail crate - inbound mail sync for disposable addresses
//!
//! This crate provides the platform-independent core of the relay:
//! - Domain models (Message, EmailAddress, Cursor, AddressRecord)
//! - Gmail API client, OAuth token handling and message normalization
//! - Watermark, inbox and address-pool stores
//! - Idempotent, single-flight sync engine
//! - Broadcast fan-out of newly accepted mail
//!
//! Everything here is synchronous apart from the fan-out channel; the
//! `relay` binary decides which runtime threads drive it.

pub mod changes;
pub mod config;
pub mod gmail;
pub mod models;
pub mod notify;
pub mod storage;
pub mod sync;

pub use changes::{ChangeBatch, ChangeEvent, ChangeKind, ChangeLog, RemoteError};
pub use config::{GmailCredentials, ServiceConfig};
pub use gmail::{BodyPart, GmailAuth, GmailClient, WatchRegistration, extract_body, normalize_message};
pub use models::{
    AddressRecord, AddressStatus, Cursor, DEFAULT_SUBJECT, EmailAddress, Message, MessageId,
    WatermarkState, normalize_address,
};
pub use notify::{InboxEvent, Notifier};
pub use storage::{
    FileAddressPool, FileWatermarkStore, InMemoryWatermarkStore, InboxStore, InsertOutcome,
    PoolError, WatermarkError, WatermarkStore,
};
pub use sync::{SingleFlight, SyncEngine, SyncError, SyncOutcome, SyncPhase, SyncReport, SyncStatus};
