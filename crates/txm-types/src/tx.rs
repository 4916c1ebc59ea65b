use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{Nonce, SequenceId, Signer, TxHash, TxId};

/// Lifecycle status of a [`ManagedTx`].
///
/// `Succeeded`/`Failed` are terminal: once set, a transaction is never
/// mutated again except by deletion. `Suspended` exists for transactions a
/// policy engine or operator has parked without deleting them (they remain
/// addressable but are skipped by the scheduler's steady-state cycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Succeeded,
    Failed,
    Suspended
}

impl TxStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// The originating request a [`ManagedTx`] was created from. Immutable for
/// the lifetime of the transaction. Everything beyond `from` is opaque to the
/// core: it is forwarded to the connector and policy engine untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRequest {
    /// Signer identity the transaction is submitted under.
    pub from:    Signer,
    /// Opaque payload (to/value/data/gas parameters/...), connector-specific.
    pub payload: Value
}

/// A single entry in a transaction's bounded error history. Newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedTxError {
    pub time:   DateTime<Utc>,
    pub reason: String,
    pub error:  String
}

/// One confirming block observed by the confirmation tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDescriptor {
    pub block_number: u64,
    pub block_hash:   String,
    pub parent_hash:  String
}

/// The outcome of a mined transaction, as reported by the connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub block_number: u64,
    pub block_hash:   String,
    pub success:      bool,
    pub protocol_id:  Option<String>,
    pub extra_info:   Option<Value>
}

/// A transaction the scheduler is driving to a terminal state.
///
/// Owned by the scheduler while inflight (via `PendingState`); otherwise
/// owned by the persistence layer. See the crate-level invariants: the pair
/// `(signer, nonce)` is unique across all non-deleted transactions, nonces
/// never decrease for a signer with unconfirmed work, and terminal
/// transactions are never mutated except by deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedTx {
    pub id:               TxId,
    pub sequence_id:      SequenceId,
    pub signer:           Signer,
    pub nonce:            Nonce,
    pub status:           TxStatus,
    pub created:          DateTime<Utc>,
    pub updated:          DateTime<Utc>,
    pub first_submit:     Option<DateTime<Utc>>,
    pub last_submit:      Option<DateTime<Utc>>,
    pub transaction_hash: Option<TxHash>,
    pub receipt:          Option<Receipt>,
    pub confirmations:    Vec<BlockDescriptor>,
    pub delete_requested: Option<DateTime<Utc>>,
    pub error_history:    VecDeque<ManagedTxError>,
    pub request:          TransactionRequest
}

impl ManagedTx {
    pub fn new(id: TxId, signer: Signer, nonce: Nonce, request: TransactionRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            sequence_id: SequenceId::new(),
            signer,
            nonce,
            status: TxStatus::Pending,
            created: now,
            updated: now,
            first_submit: None,
            last_submit: None,
            transaction_hash: None,
            receipt: None,
            confirmations: Vec::new(),
            delete_requested: None,
            error_history: VecDeque::new(),
            request
        }
    }

    /// Mirrors `history.front()`: the most recent error message, or `None`.
    pub fn error_message(&self) -> Option<&str> {
        self.error_history.front().map(|e| e.error.as_str())
    }

    /// Prepend a new error, truncating to `capacity` (newest-first).
    pub fn push_error(&mut self, capacity: usize, reason: impl Into<String>, error: impl Into<String>) {
        self.error_history.push_front(ManagedTxError {
            time:   Utc::now(),
            reason: reason.into(),
            error:  error.into()
        });
        while self.error_history.len() > capacity {
            self.error_history.pop_back();
        }
    }

    pub fn mark_submitted(&mut self, hash: TxHash) {
        let now = Utc::now();
        if self.first_submit.is_none() {
            self.first_submit = Some(now);
        }
        self.last_submit = Some(now);
        self.transaction_hash = Some(hash);
    }
}
