//! Domain models for inbound mail

mod address;
mod cursor;
mod message;

pub use address::{AddressRecord, AddressStatus};
pub use cursor::{Cursor, WatermarkState};
pub use message::{DEFAULT_SUBJECT, EmailAddress, Message, MessageBuilder, MessageId, normalize_address};
