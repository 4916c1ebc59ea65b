//! The durable store contract the core depends on (C1).
//!
//! Grounded on `internal/persistence/persistence.go` of the original
//! implementation. Concrete production backends (SQL, KV, file-based) are out
//! of scope (§1) — this crate defines the contract plus a reference in-memory
//! implementation used to compose and test the rest of the system, in the
//! same spirit as the teacher's `order-pool::noop`/`test_utils` modules
//! providing a reference pool alongside the trait they implement.

pub mod memory;

use async_trait::async_trait;
use txm_types::{
    error::TmError, ids::Nonce, EventStream, Listener, ListenerId, ManagedTx, PageRequest,
    SequenceId, StreamId, TxId
};

/// Durable store for streams, listeners, transactions, and checkpoints.
///
/// Guarantees required of any implementation: atomic per-operation writes,
/// strong read-your-writes on the same logical key, no required global
/// transaction. "Not found" is a successful `Ok(None)`, never an error.
#[async_trait]
pub trait Persistence: Send + Sync + 'static {
    async fn write_checkpoint(&self, stream_id: StreamId, blob: serde_json::Value) -> Result<(), TmError>;
    async fn get_checkpoint(&self, stream_id: StreamId) -> Result<Option<serde_json::Value>, TmError>;
    async fn delete_checkpoint(&self, stream_id: StreamId) -> Result<(), TmError>;

    async fn list_streams(&self, page: PageRequest<StreamId>) -> Result<Vec<EventStream>, TmError>;
    async fn get_stream(&self, id: StreamId) -> Result<Option<EventStream>, TmError>;
    async fn write_stream(&self, stream: &EventStream) -> Result<(), TmError>;
    async fn delete_stream(&self, id: StreamId) -> Result<(), TmError>;

    async fn list_listeners(&self, page: PageRequest<ListenerId>) -> Result<Vec<Listener>, TmError>;
    async fn list_stream_listeners(
        &self,
        page: PageRequest<ListenerId>,
        stream_id: StreamId
    ) -> Result<Vec<Listener>, TmError>;
    async fn get_listener(&self, id: ListenerId) -> Result<Option<Listener>, TmError>;
    async fn write_listener(&self, listener: &Listener) -> Result<(), TmError>;
    async fn delete_listener(&self, id: ListenerId) -> Result<(), TmError>;

    /// Reverse-create-time ordering by default; `after` names the previous
    /// page's last transaction id (exclusive cursor).
    async fn list_transactions_by_create_time(
        &self,
        page: PageRequest<TxId>
    ) -> Result<Vec<ManagedTx>, TmError>;
    /// Reverse-nonce ordering within `signer`.
    async fn list_transactions_by_nonce(
        &self,
        signer: &str,
        page: PageRequest<Nonce>
    ) -> Result<Vec<ManagedTx>, TmError>;
    /// Only `status = Pending`, ordered by `sequence_id`.
    async fn list_transactions_pending(
        &self,
        page: PageRequest<SequenceId>
    ) -> Result<Vec<ManagedTx>, TmError>;
    async fn get_transaction_by_id(&self, id: &str) -> Result<Option<ManagedTx>, TmError>;
    async fn get_transaction_by_nonce(
        &self,
        signer: &str,
        nonce: Nonce
    ) -> Result<Option<ManagedTx>, TmError>;
    /// Must fail with a conflict if `is_new` and a record with `tx.id`
    /// already exists. Otherwise an upsert.
    async fn write_transaction(&self, tx: &ManagedTx, is_new: bool) -> Result<(), TmError>;
    async fn delete_transaction(&self, id: &str) -> Result<(), TmError>;

    async fn close(&self);
}
