//! Shared data model and error/retry/pagination primitives for the
//! transaction manager workspace.
//!
//! Grounded on `pkg/apitypes`/`pkg/ffcapi` of the original implementation and
//! on the teacher's `crates/types` crate (one shared "base types" crate
//! imported by every other crate in the workspace).

pub mod error;
pub mod ethcompat;
pub mod ids;
pub mod listener;
pub mod pagination;
pub mod retry;
pub mod stream;
pub mod tx;

pub use error::{ConflictError, NotFoundKind, TmError, ValidationError};
pub use ids::{ListenerId, Nonce, SequenceId, Signer, StreamId, TxHash, TxId};
pub use listener::Listener;
pub use pagination::{PageRequest, SortDirection};
pub use stream::{BatchConfig, DeliveryMode, EventStream, StreamConfig, StreamStatus};
pub use tx::{BlockDescriptor, ManagedTx, ManagedTxError, Receipt, TransactionRequest, TxStatus};
