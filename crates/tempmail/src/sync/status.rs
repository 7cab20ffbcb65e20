//! Sync phase and outcome tracking for health reporting

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::Cursor;

/// Where the engine currently is in a sync pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    Idle,
    LoadingWatermark,
    QueryingChanges,
    ProcessingBatch,
    AdvancingWatermark,
}

/// Counters from one sync pass
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// "Message added" events returned by the change log
    pub events: usize,
    /// Messages newly stored in an inbox
    pub inserted: usize,
    /// Messages already present (replayed batch)
    pub duplicates: usize,
    /// Messages for addresses without an active inbox
    pub inactive: usize,
    /// Messages deleted before they could be fetched
    pub missing: usize,
    /// Messages without a usable recipient
    pub unroutable: usize,
    /// Watermark persisted by this pass, if it advanced
    pub advanced_to: Option<Cursor>,
    pub duration_ms: u64,
}

/// How the last pass ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum SyncOutcome {
    Completed { report: SyncReport },
    Aborted { reason: String },
}

/// Snapshot served by the health endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub last_outcome: Option<SyncOutcome>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: SyncPhase::Idle,
            last_outcome: None,
            last_sync_at: None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatusTracker {
    inner: Mutex<SyncStatus>,
}

impl StatusTracker {
    pub(crate) fn enter(&self, phase: SyncPhase) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .phase = phase;
    }

    pub(crate) fn record(&self, outcome: SyncOutcome) {
        let mut status = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        status.phase = SyncPhase::Idle;
        status.last_outcome = Some(outcome);
        status.last_sync_at = Some(Utc::now());
    }

    pub(crate) fn snapshot(&self) -> SyncStatus {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
