//! Re-entrancy guard for sender cycles.
//!
//! `Idle -> Sending -> Idle`. A trigger arriving while `Sending` only
//! records that another cycle is due; the task running the cycle picks it up
//! when it finishes. At most one cycle per stream is ever in flight and no
//! trigger is lost.

use std::sync::Mutex;

use layersync_core::types::SyncState;

use crate::context::lock;

#[derive(Debug, Default)]
pub struct CycleGate {
    state: Mutex<SyncState>,
}

impl CycleGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SyncState {
        *lock(&self.state)
    }

    /// Try to start a cycle. Returns `false` when one is already running, in
    /// which case a retrigger is recorded.
    pub fn try_begin(&self) -> bool {
        let mut state = lock(&self.state);
        match *state {
            SyncState::Idle => {
                *state = SyncState::Sending;
                true
            }
            SyncState::Sending | SyncState::SendingWithPendingRetrigger => {
                *state = SyncState::SendingWithPendingRetrigger;
                false
            }
        }
    }

    /// End the running cycle. Returns `true` when a retrigger was pending:
    /// the gate stays in `Sending` and the caller runs the next cycle.
    pub fn finish(&self) -> bool {
        let mut state = lock(&self.state);
        match *state {
            SyncState::SendingWithPendingRetrigger => {
                *state = SyncState::Sending;
                true
            }
            SyncState::Sending | SyncState::Idle => {
                *state = SyncState::Idle;
                false
            }
        }
    }
}
