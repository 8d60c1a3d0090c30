//! Lifecycle and epoch bookkeeping shared by all controllers.

use crate::error::{Result, SyncError};
use crate::types::{Epoch, SyncState};

/// `Reset -> Setup -> Ready` state machine with a generation counter.
///
/// The epoch advances on every `begin_init` and every `reset`, so a
/// response tagged with an older epoch can always be recognised as stale.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: SyncState,
    epoch: Epoch,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Enter `Setup` and return the epoch the new attempt runs under.
    pub fn begin_init(&mut self) -> Result<Epoch> {
        if self.state != SyncState::Reset {
            return Err(SyncError::AlreadyInitialized(self.state));
        }
        self.state = SyncState::Setup;
        self.epoch = self.epoch.next();
        Ok(self.epoch)
    }

    /// True while the attempt started under `epoch` is still setting up.
    pub fn is_setting_up(&self, epoch: Epoch) -> bool {
        self.state == SyncState::Setup && self.epoch == epoch
    }

    /// True once the attempt started under `epoch` has become ready.
    pub fn is_live(&self, epoch: Epoch) -> bool {
        self.state == SyncState::Ready && self.epoch == epoch
    }

    /// Move a current `Setup` attempt to `Ready`. Returns false if stale.
    pub fn mark_ready(&mut self, epoch: Epoch) -> bool {
        if !self.is_setting_up(epoch) {
            return false;
        }
        self.state = SyncState::Ready;
        true
    }

    /// Drop back from `Ready` to `Setup` for the same attempt.
    pub fn revert_to_setup(&mut self, epoch: Epoch) {
        if self.is_live(epoch) {
            self.state = SyncState::Setup;
        }
    }

    /// Invalidate everything in flight and return to `Reset`.
    pub fn reset(&mut self) -> Epoch {
        self.epoch = self.epoch.next();
        self.state = SyncState::Reset;
        self.epoch
    }
}
