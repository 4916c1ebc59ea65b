//! An in-process stand-in for a real ledger connector, used when `txmand` is
//! run without `--connector-plugin` wired to something real. Mines every
//! submitted transaction immediately and never emits listener events.
//!
//! Production connectors are out of scope for this workspace; this exists so
//! the binary is runnable end-to-end (matching how `bin/devnet` gives the
//! teacher's workspace a local environment to point its own RPC at) rather
//! than requiring an external process before `txmand` does anything.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use txm_connector::{Connector, ConnectorError, EventStreamStartRequest, PreparedTransaction};
use txm_types::{ids::Nonce, Listener, ListenerId, Receipt, StreamId, TxHash};

#[derive(Default)]
pub struct DemoConnector {
    next_block: AtomicU64
}

#[async_trait]
impl Connector for DemoConnector {
    async fn next_nonce_for_signer(&self, _signer: &str) -> Result<Nonce, ConnectorError> {
        Ok(Nonce::from(0u64))
    }

    async fn transaction_send(&self, prepared: PreparedTransaction) -> Result<TxHash, ConnectorError> {
        Ok(format!("0xdemo{}", prepared.nonce))
    }

    async fn transaction_receipt(&self, hash: &str) -> Result<Option<Receipt>, ConnectorError> {
        let block_number = self.next_block.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Receipt {
            block_number,
            block_hash: format!("0xblock{block_number}"),
            success: true,
            protocol_id: None,
            extra_info: Some(Value::String(hash.to_string()))
        }))
    }

    async fn event_stream_start(&self, req: EventStreamStartRequest) -> Result<(), ConnectorError> {
        // No upstream events to push; just hold the channels open until
        // cancelled so the stream runtime's Starting -> Started transition
        // still happens.
        drop(req.listener_events);
        drop(req.block_hashes);
        Ok(())
    }

    async fn event_stream_stopped(&self, _stream_id: StreamId) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn event_listener_verify_options(&self, options: &Value) -> Result<Value, ConnectorError> {
        Ok(options.clone())
    }

    async fn event_listener_add(
        &self,
        _stream_id: StreamId,
        _listener: &Listener
    ) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn event_listener_remove(
        &self,
        _stream_id: StreamId,
        _listener_id: ListenerId
    ) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn event_listener_hwm(
        &self,
        _stream_id: StreamId,
        _listener_id: ListenerId
    ) -> Result<Option<Value>, ConnectorError> {
        Ok(None)
    }
}
