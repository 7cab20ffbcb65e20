//! Incremental sync from the provider change log into local inboxes

use std::sync::Arc;
use std::time::Instant;

use crate::changes::{ChangeEvent, ChangeKind, ChangeLog, RemoteError};
use crate::gmail::normalize_message;
use crate::models::{Cursor, MessageId};
use crate::notify::{InboxEvent, Notifier};
use crate::storage::{InboxStore, InsertOutcome, WatermarkError, WatermarkStore};

use super::flight::SingleFlight;
use super::status::{StatusTracker, SyncOutcome, SyncPhase, SyncReport, SyncStatus};

/// Why a sync pass stopped without advancing the watermark
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no watermark stored ({0}); seed one with `relay watch`")]
    WatermarkMissing(String),
    #[error(transparent)]
    WatermarkUnreadable(WatermarkError),
    #[error("listing changes failed: {0}")]
    ListChanges(#[source] RemoteError),
    #[error("fetching message {id} failed: {source}")]
    FetchMessage { id: MessageId, source: RemoteError },
    #[error("saving watermark failed: {0}")]
    SaveWatermark(#[source] WatermarkError),
}

impl SyncError {
    /// Whether retrying on the next trigger can't help until someone
    /// intervenes (re-seeding the watermark, re-authorizing)
    pub fn needs_operator(&self) -> bool {
        match self {
            SyncError::WatermarkMissing(_) | SyncError::WatermarkUnreadable(_) => true,
            SyncError::ListChanges(e) | SyncError::FetchMessage { source: e, .. } => matches!(
                e,
                RemoteError::HistoryExpired | RemoteError::Unauthorized(_)
            ),
            SyncError::SaveWatermark(_) => false,
        }
    }
}

/// Turns change-log batches into inbox updates
///
/// One pass: load watermark, list changes since it, fetch and route every
/// added message, then persist the batch cursor. Any failure other than a
/// vanished or unroutable message aborts the pass with the watermark
/// untouched, so the next trigger replays the same batch; idempotent
/// inserts make that replay harmless.
pub struct SyncEngine {
    change_log: Arc<dyn ChangeLog>,
    watermark: Arc<dyn WatermarkStore>,
    inboxes: Arc<InboxStore>,
    notifier: Notifier,
    flight: SingleFlight,
    status: StatusTracker,
}

impl SyncEngine {
    pub fn new(
        change_log: Arc<dyn ChangeLog>,
        watermark: Arc<dyn WatermarkStore>,
        inboxes: Arc<InboxStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            change_log,
            watermark,
            inboxes,
            notifier,
            flight: SingleFlight::new(),
            status: StatusTracker::default(),
        }
    }

    pub fn inboxes(&self) -> &Arc<InboxStore> {
        &self.inboxes
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn flight(&self) -> &SingleFlight {
        &self.flight
    }

    /// Current phase and last outcome
    pub fn status(&self) -> SyncStatus {
        self.status.snapshot()
    }

    /// Handle one trigger synchronously
    ///
    /// Returns `None` if a pass was already running (the trigger becomes
    /// its pending rerun), otherwise the number of passes performed.
    pub fn trigger(&self) -> Option<usize> {
        if !self.flight.try_begin() {
            log::debug!("Sync already running; trigger coalesced");
            return None;
        }
        Some(self.run_claimed())
    }

    /// Run passes until no trigger is pending
    ///
    /// The caller must already own the flight via
    /// [`SingleFlight::try_begin`]. The flight is released on return, and
    /// also if a pass panics.
    pub fn run_claimed(&self) -> usize {
        let _release = ReleaseOnPanic(&self.flight);
        let mut passes = 0;
        loop {
            // outcome is logged and recorded in the status
            let _ = self.run_once();
            passes += 1;
            if !self.flight.finish() {
                return passes;
            }
            log::debug!("Trigger arrived during sync; running again");
        }
    }

    /// Perform a single sync pass
    ///
    /// Does not consult the single-flight guard; callers that may overlap
    /// go through [`trigger`](Self::trigger) or [`run_claimed`](Self::run_claimed).
    pub fn run_once(&self) -> Result<SyncReport, SyncError> {
        let start = Instant::now();
        let mut report = SyncReport::default();

        let result = self.run_phases(&mut report);
        report.duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                log::info!(
                    "Sync complete: {} events, {} inserted, {} duplicate, {} inactive, {} missing, {} unroutable ({}ms)",
                    report.events,
                    report.inserted,
                    report.duplicates,
                    report.inactive,
                    report.missing,
                    report.unroutable,
                    report.duration_ms
                );
                self.status.record(SyncOutcome::Completed {
                    report: report.clone(),
                });
                Ok(report)
            }
            Err(e) => {
                if e.needs_operator() {
                    log::error!("Sync aborted: {}", e);
                } else {
                    log::warn!("Sync aborted, will retry on next trigger: {}", e);
                }
                self.status.record(SyncOutcome::Aborted {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn run_phases(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        self.status.enter(SyncPhase::LoadingWatermark);
        let since = self.load_watermark()?;

        self.status.enter(SyncPhase::QueryingChanges);
        log::info!("Syncing from cursor {}", since);
        let batch = self
            .change_log
            .list_changes(&since)
            .map_err(SyncError::ListChanges)?;

        if batch.is_empty() {
            log::info!("No new messages since {}", since);
            return Ok(());
        }

        self.status.enter(SyncPhase::ProcessingBatch);
        report.events = batch.events.len();
        for event in &batch.events {
            self.process_event(event, report)?;
        }

        self.status.enter(SyncPhase::AdvancingWatermark);
        self.advance(&since, &batch.new_cursor)?;
        report.advanced_to = Some(batch.new_cursor);
        Ok(())
    }

    fn load_watermark(&self) -> Result<Cursor, SyncError> {
        self.watermark.load().map_err(|e| match e {
            WatermarkError::NotFound(location) => SyncError::WatermarkMissing(location),
            other => SyncError::WatermarkUnreadable(other),
        })
    }

    fn advance(&self, from: &Cursor, to: &Cursor) -> Result<(), SyncError> {
        self.watermark.save(to).map_err(SyncError::SaveWatermark)?;
        log::debug!("Watermark advanced {} -> {}", from, to);
        Ok(())
    }

    fn process_event(&self, event: &ChangeEvent, report: &mut SyncReport) -> Result<(), SyncError> {
        if event.kind != ChangeKind::MessageAdded {
            return Ok(());
        }
        let id = &event.message_id;

        let raw = match self.change_log.fetch_message(id) {
            Ok(raw) => raw,
            Err(RemoteError::NotFound(_)) => {
                log::info!("Message {} no longer exists; skipping", id);
                report.missing += 1;
                return Ok(());
            }
            Err(source) => {
                return Err(SyncError::FetchMessage {
                    id: id.clone(),
                    source,
                });
            }
        };

        let Some(message) = normalize_message(&raw) else {
            log::warn!("Message {} has no recipient; skipping", id);
            report.unroutable += 1;
            return Ok(());
        };

        let address = message.recipient_address.clone();
        match self.inboxes.insert(&address, message.clone()) {
            InsertOutcome::Inserted => {
                report.inserted += 1;
                log::info!("Stored message {} for {}", id, address);
                let delivered = self.notifier.publish(InboxEvent::NewMail { message });
                log::debug!("Message {} pushed to {} subscribers", id, delivered);
            }
            InsertOutcome::Duplicate => {
                report.duplicates += 1;
                log::debug!("Message {} already in inbox {}", id, address);
            }
            InsertOutcome::NotActive => {
                report.inactive += 1;
                log::debug!("No active inbox for {}; dropped message {}", address, id);
            }
        }
        Ok(())
    }
}

struct ReleaseOnPanic<'a>(&'a SingleFlight);

impl Drop for ReleaseOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abandon();
        }
    }
}
