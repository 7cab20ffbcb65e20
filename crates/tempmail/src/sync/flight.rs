//! Single-flight guard with a one-shot rerun flag

use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
struct FlightState {
    running: bool,
    pending: bool,
}

/// Ensures at most one sync runs at a time
///
/// A trigger that arrives while a run is in progress does not start a
/// second run; it sets a single `pending` flag instead, and the running
/// owner performs exactly one more pass when it finishes. Any number of
/// overlapping triggers collapse into that one rerun.
#[derive(Debug, Default)]
pub struct SingleFlight {
    state: Mutex<FlightState>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flight
    ///
    /// Returns `true` if the caller now owns the run and must eventually
    /// call [`finish`](Self::finish). Returns `false` if a run was already
    /// in progress; the trigger has been recorded as pending.
    pub fn try_begin(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.running {
            state.pending = true;
            false
        } else {
            state.running = true;
            true
        }
    }

    /// Called by the owner after each pass
    ///
    /// Returns `true` when a trigger arrived during the pass: the pending
    /// flag is consumed and the owner must run again. Otherwise the flight
    /// is released and `false` is returned.
    pub fn finish(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.pending {
            state.pending = false;
            true
        } else {
            state.running = false;
            false
        }
    }

    /// Release the flight unconditionally, dropping any pending rerun
    pub fn abandon(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = FlightState::default();
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_trigger_owns_the_flight() {
        let flight = SingleFlight::new();
        assert!(flight.try_begin());
        assert!(flight.is_running());
        assert!(!flight.finish());
        assert!(!flight.is_running());
    }

    #[test]
    fn test_overlapping_triggers_coalesce_into_one_rerun() {
        let flight = SingleFlight::new();
        assert!(flight.try_begin());

        assert!(!flight.try_begin());
        assert!(!flight.try_begin());
        assert!(!flight.try_begin());

        // one rerun for all three
        assert!(flight.finish());
        assert!(flight.is_running());
        assert!(!flight.finish());
        assert!(!flight.is_running());
    }

    #[test]
    fn test_trigger_during_rerun_schedules_another() {
        let flight = SingleFlight::new();
        assert!(flight.try_begin());
        assert!(!flight.try_begin());
        assert!(flight.finish());

        assert!(!flight.try_begin());
        assert!(flight.finish());
        assert!(!flight.finish());
    }

    #[test]
    fn test_abandon_releases() {
        let flight = SingleFlight::new();
        assert!(flight.try_begin());
        assert!(!flight.try_begin());

        flight.abandon();
        assert!(!flight.is_running());
        assert!(flight.try_begin());
        assert!(!flight.finish());
    }
}
