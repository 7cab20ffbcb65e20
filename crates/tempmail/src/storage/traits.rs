//! Storage trait definitions

use crate::models::Cursor;

/// Failure loading or saving the watermark
#[derive(Debug, thiserror::Error)]
pub enum WatermarkError {
    /// Nothing has been persisted yet; the relay needs `relay watch` to seed it
    #[error("no watermark stored at {0}")]
    NotFound(String),
    /// A document exists but cannot be interpreted
    #[error("watermark at {location} is unreadable: {reason}")]
    Corrupt { location: String, reason: String },
    #[error("watermark I/O failed: {0}")]
    Io(String),
}

/// Persistence for the single process-wide sync cursor
///
/// `save` must be atomic: after a crash the store holds either the old
/// cursor or the new one, never a torn value.
pub trait WatermarkStore: Send + Sync {
    /// Read the last fully processed cursor
    fn load(&self) -> Result<Cursor, WatermarkError>;

    /// Replace the stored cursor
    fn save(&self, cursor: &Cursor) -> Result<(), WatermarkError>;
}
