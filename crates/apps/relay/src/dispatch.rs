//! Background dispatch of sync passes
//!
//! The engine is synchronous (blocking HTTP), so each run goes to tokio's
//! blocking pool. A supervisor task awaits it and logs a panic or join
//! failure; nothing is ever reported back to the webhook caller.

use std::sync::Arc;

use log::{debug, error};
use tempmail::SyncEngine;

#[derive(Clone)]
pub struct SyncDispatcher {
    engine: Arc<SyncEngine>,
}

impl SyncDispatcher {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }

    /// Request a sync without waiting for it
    ///
    /// Returns `true` if a background run was started, `false` if one was
    /// already in flight and this trigger was folded into its rerun.
    /// Must be called from within a tokio runtime.
    pub fn trigger(&self) -> bool {
        if !self.engine.flight().try_begin() {
            debug!("Sync in progress; trigger coalesced");
            return false;
        }

        let engine = self.engine.clone();
        let run = tokio::task::spawn_blocking(move || engine.run_claimed());

        tokio::spawn(async move {
            match run.await {
                Ok(passes) => debug!("Background sync finished after {} pass(es)", passes),
                Err(e) if e.is_panic() => error!("Background sync panicked: {}", e),
                Err(e) => error!("Background sync task failed: {}", e),
            }
        });

        true
    }
}
