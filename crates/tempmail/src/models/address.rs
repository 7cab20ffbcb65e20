//! Address record from the disposable address pool

use serde::{Deserialize, Serialize};

/// Lifecycle of a pooled address
///
/// `Available -> Assigned -> Retired`. Retired is terminal: a retired
/// address is never handed out again, so a stranger can't receive mail
/// meant for a previous holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressStatus {
    Available,
    Assigned,
    Retired,
}

/// A disposable address and its lifecycle status
///
/// Older pool files carry `is_used: bool` instead of `status`; those read
/// as `Assigned` when used and `Available` otherwise. Writes always use
/// `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredRecord")]
pub struct AddressRecord {
    /// Email address, stored in normalized (lowercase) form
    pub address: String,
    pub status: AddressStatus,
}

/// On-disk shape accepted when reading, current or legacy
#[derive(Deserialize)]
struct StoredRecord {
    address: String,
    status: Option<AddressStatus>,
    is_used: Option<bool>,
}

impl TryFrom<StoredRecord> for AddressRecord {
    type Error = String;

    fn try_from(stored: StoredRecord) -> Result<Self, Self::Error> {
        let status = match (stored.status, stored.is_used) {
            (Some(status), _) => status,
            (None, Some(true)) => AddressStatus::Assigned,
            (None, Some(false)) => AddressStatus::Available,
            (None, None) => {
                return Err(format!("address {} has neither status nor is_used", stored.address));
            }
        };
        Ok(Self {
            address: stored.address,
            status,
        })
    }
}

impl AddressRecord {
    /// Create a new available record
    pub fn available(address: impl Into<String>) -> Self {
        Self {
            address: super::normalize_address(&address.into()),
            status: AddressStatus::Available,
        }
    }

    /// Whether mail for this address should be accepted
    pub fn is_active(&self) -> bool {
        self.status == AddressStatus::Assigned
    }
}
