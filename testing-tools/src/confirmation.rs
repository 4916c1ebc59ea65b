//! A no-op [`ConfirmationTracker`]: accepts every notification and never
//! calls a callback back. The real block-walk that would do so is
//! connector-specific and out of scope for this workspace; this stand-in
//! exists so the scheduler and the demo binary have something to construct.

use txm_scheduler::confirmation::{ConfirmTrackerError, ConfirmationTracker, Notification};

#[derive(Default)]
pub struct NoopConfirmationTracker;

impl NoopConfirmationTracker {
    pub fn new() -> Self {
        Self
    }
}

impl ConfirmationTracker for NoopConfirmationTracker {
    fn notify(&self, _notification: Notification) -> Result<(), ConfirmTrackerError> {
        Ok(())
    }
}
