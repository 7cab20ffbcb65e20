//! Storage traits and implementations
//!
//! The watermark is the only durable sync state and sits behind a trait so
//! the engine can run against a file or an in-memory value. Inboxes are
//! deliberately in-memory; the address pool is a plain JSON file.

mod memory;
mod pool;
mod traits;
mod watermark;

pub use memory::{InboxStore, InsertOutcome};
pub use pool::{FileAddressPool, PoolError};
pub use traits::{WatermarkError, WatermarkStore};
pub use watermark::{FileWatermarkStore, InMemoryWatermarkStore};
