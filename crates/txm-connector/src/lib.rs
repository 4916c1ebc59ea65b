//! The connector contract (C2): outbound calls into the ledger.
//!
//! Grounded on `pkg/ffcapi` of the original implementation (`api_test.go`,
//! `event_stream_start.go`) and on the teacher's `OrderValidator`/`OrderPool`
//! trait shape in `order-pool/src/traits.rs` and `order-pool/src/validate/mod.rs`
//! (async trait, pluggable per implementation, no persistence access).

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use txm_types::{ids::Nonce, Listener, ListenerId, Receipt, Signer, StreamId, TxHash};

/// Stable reason code classifying a failed `transaction_send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorErrorReason {
    NonceTooLow,
    InsufficientFunds,
    Invalid,
    Transient
}

#[derive(Debug, Error, Clone)]
#[error("connector error ({reason:?}): {message}")]
pub struct ConnectorError {
    pub reason:  ConnectorErrorReason,
    pub message: String
}

impl ConnectorError {
    pub fn new(reason: ConnectorErrorReason, message: impl Into<String>) -> Self {
        Self { reason, message: message.into() }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self.reason, ConnectorErrorReason::Transient)
    }
}

/// A transaction prepared (signed, gas-priced) by the policy engine and
/// handed to the connector for broadcast. The core makes no assumptions about
/// its encoding.
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    pub from:    Signer,
    pub nonce:   Nonce,
    pub payload: serde_json::Value
}

/// One event observed on a listener's underlying log/subscription, pushed
/// into the `listener_events` sink of an `EventStreamStartRequest`.
#[derive(Debug, Clone)]
pub struct ListenerEvent {
    pub listener_id: ListenerId,
    pub data:        serde_json::Value,
    /// Updated high-water-mark/checkpoint for this listener, if the
    /// connector tracks one independently of the stream runtime's batching.
    pub checkpoint:  Option<serde_json::Value>
}

/// Request handed to `Connector::event_stream_start`. The connector pushes
/// listener events and block-hash notifications until `cancel` fires; the
/// core guarantees to drain both channels until cancellation completes (§4.2).
pub struct EventStreamStartRequest {
    pub stream_id:       StreamId,
    pub cancel:          CancellationToken,
    pub listener_events: mpsc::Sender<ListenerEvent>,
    pub block_hashes:    mpsc::Sender<String>,
    pub listeners:       Vec<Listener>
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn next_nonce_for_signer(&self, signer: &str) -> Result<Nonce, ConnectorError>;

    async fn transaction_send(&self, prepared: PreparedTransaction) -> Result<TxHash, ConnectorError>;

    async fn transaction_receipt(&self, hash: &str) -> Result<Option<Receipt>, ConnectorError>;

    /// Starts pushing events for `req.stream_id`'s listener set. Returns once
    /// the listener set has been attached (the runtime transitions
    /// Starting -> Started on return), not once the stream stops.
    async fn event_stream_start(&self, req: EventStreamStartRequest) -> Result<(), ConnectorError>;

    /// Acknowledges a stream has fully stopped; idempotent for an unknown id.
    async fn event_stream_stopped(&self, stream_id: StreamId) -> Result<(), ConnectorError>;

    async fn event_listener_verify_options(
        &self,
        options: &serde_json::Value
    ) -> Result<serde_json::Value, ConnectorError>;

    async fn event_listener_add(
        &self,
        stream_id: StreamId,
        listener: &Listener
    ) -> Result<(), ConnectorError>;

    /// No-op if `listener_id` is unknown to the connector.
    async fn event_listener_remove(
        &self,
        stream_id: StreamId,
        listener_id: ListenerId
    ) -> Result<(), ConnectorError>;

    async fn event_listener_hwm(
        &self,
        stream_id: StreamId,
        listener_id: ListenerId
    ) -> Result<Option<serde_json::Value>, ConnectorError>;
}
