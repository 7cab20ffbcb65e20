//! Change-log cursor (the sync watermark)

use serde::{Deserialize, Serialize};

/// Opaque position in the provider's append-only change log
///
/// For Gmail this is a `historyId`. The value is never interpreted locally;
/// it is only handed back to the provider as the start of the next query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Cursor {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// On-disk watermark document: `{"lastCursor": "..."}`
///
/// Rewritten wholesale after every successful sync. Files written by the
/// older watch scripts used `lastHistoryId`, which is accepted on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatermarkState {
    #[serde(alias = "lastHistoryId")]
    pub last_cursor: Cursor,
}

impl WatermarkState {
    pub fn new(cursor: Cursor) -> Self {
        Self {
            last_cursor: cursor,
        }
    }
}
