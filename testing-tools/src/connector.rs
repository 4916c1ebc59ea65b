//! A scripted [`Connector`] mock: callers queue up the outcome of the next
//! `transaction_send`/`next_nonce_for_signer` call per signer and the mock
//! plays them back in order, panicking on an empty queue rather than
//! guessing a default — the same "insert-or-panic" discipline the teacher's
//! `MockValidator` applies to keep a misconfigured test loud instead of
//! silently wrong.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use txm_connector::{Connector, ConnectorError, EventStreamStartRequest, PreparedTransaction};
use txm_types::{ids::Nonce, Listener, ListenerId, Receipt, StreamId, TxHash};

#[derive(Default)]
pub struct MockConnector {
    nonces:   Mutex<HashMap<String, Nonce>>,
    sends:    Mutex<HashMap<String, VecDeque<Result<TxHash, ConnectorError>>>>,
    receipts: Mutex<HashMap<String, Receipt>>
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_next_nonce(&self, signer: &str, nonce: Nonce) {
        self.nonces.lock().insert(signer.to_string(), nonce);
    }

    pub fn queue_send_result(&self, signer: &str, result: Result<TxHash, ConnectorError>) {
        self.sends.lock().entry(signer.to_string()).or_default().push_back(result);
    }

    pub fn set_receipt(&self, tx_hash: &str, receipt: Receipt) {
        self.receipts.lock().insert(tx_hash.to_string(), receipt);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn next_nonce_for_signer(&self, signer: &str) -> Result<Nonce, ConnectorError> {
        Ok(self.nonces.lock().get(signer).copied().unwrap_or(Nonce::from(0u64)))
    }

    async fn transaction_send(&self, prepared: PreparedTransaction) -> Result<TxHash, ConnectorError> {
        let mut sends = self.sends.lock();
        let queue = sends.entry(prepared.from.clone()).or_default();
        queue
            .pop_front()
            .unwrap_or_else(|| panic!("MockConnector: no scripted send result for signer {}", prepared.from))
    }

    async fn transaction_receipt(&self, hash: &str) -> Result<Option<Receipt>, ConnectorError> {
        Ok(self.receipts.lock().get(hash).cloned())
    }

    async fn event_stream_start(&self, req: EventStreamStartRequest) -> Result<(), ConnectorError> {
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
