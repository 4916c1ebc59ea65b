//! The confirmation tracker interface (C6): the scheduler's side of the
//! contract only. The tracked-set/block-walk that actually decides when a
//! receipt has arrived and when enough confirmations have stacked on top of
//! it is connector-specific and stays out of scope here — this module just
//! defines the notification shape the scheduler and a tracker implementation
//! agree on.
//!
//! Grounded on `pkg/confirmations/manager.go` of the original implementation
//! for the `New`/`Removed` notification shape and the receipt-then-confirmed
//! callback pair `trackSubmittedTransaction` installs per transaction.

use thiserror::Error;
use txm_types::{BlockDescriptor, Receipt, TxHash, TxId};

/// A notification the scheduler sends to a [`ConfirmationTracker`]. `New`
/// installs a fresh watch on `tx_hash`, superseding any watch the same
/// `tx_id` had under a different hash. `Removed` cancels a watch by hash and
/// must be idempotent — removing a hash the tracker never saw is not an
/// error.
pub enum Notification {
    New {
        tx_id:        TxId,
        tx_hash:      TxHash,
        on_receipt:   Box<dyn FnMut(Receipt) + Send>,
        on_confirmed: Box<dyn FnMut(Vec<BlockDescriptor>) + Send>
    },
    Removed {
        tx_hash: TxHash
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfirmTrackerError {
    #[error("confirmation tracker is shutting down")]
    Cancelled
}

/// Implemented by whatever owns the connector's block/receipt feed. The
/// scheduler calls `notify` synchronously when it starts or stops caring
/// about a transaction hash; the tracker calls the supplied closures
/// asynchronously, in its own time, as it observes receipts and
/// confirmations. `on_receipt` must fire at most once and always before
/// `on_confirmed` for the same hash.
pub trait ConfirmationTracker: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), ConfirmTrackerError>;
}
