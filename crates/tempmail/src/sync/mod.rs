//! Sync engine for routing new mail into inboxes
//!
//! Every pass is safe to repeat: the watermark only moves after a whole
//! batch is processed and inbox inserts are idempotent.

mod engine;
mod flight;
mod status;

pub use engine::{SyncEngine, SyncError};
pub use flight::SingleFlight;
pub use status::{SyncOutcome, SyncPhase, SyncReport, SyncStatus};
