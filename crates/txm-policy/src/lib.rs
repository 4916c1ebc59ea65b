//! The policy engine contract (C3): decides what, if anything, happens to a
//! transaction on this scheduler cycle.
//!
//! Grounded on `pkg/policyengine/config.go`'s `PolicyEngine.Execute` of the
//! original implementation and on the teacher's `OrderValidator` trait plus
//! its one in-tree implementation in `order-pool/src/validate/mod.rs` (a
//! single-method async trait with one concrete, reference-quality impl living
//! alongside it).

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use txm_connector::{Connector, PreparedTransaction};
use txm_types::ManagedTx;

/// What the scheduler should do with a transaction after a policy cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyUpdate {
    /// No state change; re-evaluate on the next cycle.
    No,
    /// The engine mutated `mtx` (e.g. submitted it); persist the update.
    Yes,
    /// Remove the transaction; it was never submitted.
    Delete
}

/// Result of one `PolicyEngine::execute` call. `reason`/`error` are set
/// together when the cycle hit a failure worth recording in the
/// transaction's error history; the engine itself never touches that history,
/// since it has no persistence access.
#[derive(Debug, Clone)]
pub struct PolicyOutcome {
    pub update: PolicyUpdate,
    pub reason: Option<String>,
    pub error:  Option<String>
}

impl PolicyOutcome {
    pub fn no() -> Self {
        Self { update: PolicyUpdate::No, reason: None, error: None }
    }

    pub fn yes() -> Self {
        Self { update: PolicyUpdate::Yes, reason: None, error: None }
    }

    pub fn delete() -> Self {
        Self { update: PolicyUpdate::Delete, reason: None, error: None }
    }

    pub fn failed(reason: impl Into<String>, error: impl Into<String>) -> Self {
        Self { update: PolicyUpdate::No, reason: Some(reason.into()), error: Some(error.into()) }
    }
}

/// Per-cycle context handed to a policy engine. Carries nothing from
/// persistence; the engine is re-entrant per transaction and must not retain
/// state across calls beyond what `mtx` itself holds.
pub struct PolicyContext {
    pub error_history_count: usize,
    pub cancel:               CancellationToken
}

/// Decides, for a single transaction, whether to submit/resubmit, leave
/// alone, or delete it. Pure with respect to persistence: the caller is
/// responsible for writing back whatever `execute` mutates on `mtx`. The
/// scheduler serializes calls per transaction but may run different
/// transactions' cycles concurrently, so an implementation must not assume a
/// global lock is held.
#[async_trait]
pub trait PolicyEngine: Send + Sync + 'static {
    async fn execute(
        &self,
        ctx: &PolicyContext,
        connector: &dyn Connector,
        mtx: &mut ManagedTx
    ) -> PolicyOutcome;
}

/// Reference policy: submit once, then wait. No gas bumping, no resubmission
/// on staleness — those are left to a fuller policy engine's responsibility
/// (§4.3), not this crate's reference implementation.
pub struct SimplePolicy;

impl SimplePolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SimplePolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyEngine for SimplePolicy {
    async fn execute(
        &self,
        _ctx: &PolicyContext,
        connector: &dyn Connector,
        mtx: &mut ManagedTx
    ) -> PolicyOutcome {
        if mtx.delete_requested.is_some() && mtx.transaction_hash.is_none() {
            return PolicyOutcome::delete();
        }
        if mtx.transaction_hash.is_some() {
            return PolicyOutcome::no();
        }

        let prepared = PreparedTransaction {
            from:    mtx.signer.clone(),
            nonce:   mtx.nonce,
            payload: mtx.request.payload.clone()
        };
        match connector.transaction_send(prepared).await {
            Ok(hash) => {
                mtx.mark_submitted(hash);
                PolicyOutcome::yes()
            }
            Err(e) => PolicyOutcome::failed(format!("{:?}", e.reason), e.message)
        }
    }
}

type PolicyFactory = fn() -> Arc<dyn PolicyEngine>;

/// Name-keyed factory the binary consults to build the configured policy
/// engine at startup, analogous to a validator/strategy registry rather than
/// a compiled-in choice.
pub struct PolicyRegistry {
    factories: HashMap<&'static str, PolicyFactory>
}

impl PolicyRegistry {
    pub fn new() -> Self {
        let mut factories: HashMap<&'static str, PolicyFactory> = HashMap::new();
        factories.insert("simple", || Arc::new(SimplePolicy::new()));
        Self { factories }
    }

    pub fn register(&mut self, name: &'static str, factory: PolicyFactory) {
        self.factories.insert(name, factory);
    }

    pub fn build(&self, name: &str) -> Option<Arc<dyn PolicyEngine>> {
        self.factories.get(name).map(|f| f())
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;
    use txm_connector::{ConnectorError, ConnectorErrorReason, EventStreamStartRequest, ListenerEvent};
    use txm_types::{
        ids::Nonce, tx::TransactionRequest, Listener, ListenerId, ManagedTx, Receipt, StreamId, TxHash
    };

    use super::*;

    struct StubConnector {
        send_result: Result<TxHash, ConnectorError>
    }

    #[async_trait]
    impl Connector for StubConnector {
        async fn next_nonce_for_signer(&self, _signer: &str) -> Result<Nonce, ConnectorError> {
            unimplemented!()
        }

        async fn transaction_send(
            &self,
            _prepared: PreparedTransaction
        ) -> Result<TxHash, ConnectorError> {
            self.send_result.clone()
        }

        async fn transaction_receipt(&self, _hash: &str) -> Result<Option<Receipt>, ConnectorError> {
            unimplemented!()
        }

        async fn event_stream_start(
            &self,
            _req: EventStreamStartRequest
        ) -> Result<(), ConnectorError> {
            unimplemented!()
        }

        async fn event_stream_stopped(&self, _stream_id: StreamId) -> Result<(), ConnectorError> {
            unimplemented!()
        }

        async fn event_listener_verify_options(
            &self,
            _options: &Value
        ) -> Result<Value, ConnectorError> {
            unimplemented!()
        }

        async fn event_listener_add(
            &self,
            _stream_id: StreamId,
            _listener: &Listener
        ) -> Result<(), ConnectorError> {
            unimplemented!()
        }

        async fn event_listener_remove(
            &self,
            _stream_id: StreamId,
            _listener_id: ListenerId
        ) -> Result<(), ConnectorError> {
            unimplemented!()
        }

        async fn event_listener_hwm(
            &self,
            _stream_id: StreamId,
            _listener_id: ListenerId
        ) -> Result<Option<Value>, ConnectorError> {
            unimplemented!()
        }
    }

    fn mk_tx() -> ManagedTx {
        ManagedTx::new(
            "tx1".into(),
            "0xA".into(),
            Nonce::from(1u64),
            TransactionRequest { from: "0xA".into(), payload: serde_json::json!({}) }
        )
    }

    fn ctx() -> PolicyContext {
        PolicyContext { error_history_count: 10, cancel: CancellationToken::new() }
    }

    #[tokio::test]
    async fn submits_unsent_transaction() {
        let connector = StubConnector { send_result: Ok("0xhash".to_string()) };
        let policy = SimplePolicy::new();
        let mut mtx = mk_tx();
        let outcome = policy.execute(&ctx(), &connector, &mut mtx).await;
        assert_eq!(outcome.update, PolicyUpdate::Yes);
        assert_eq!(mtx.transaction_hash.as_deref(), Some("0xhash"));
        assert!(mtx.first_submit.is_some());
    }

    #[tokio::test]
    async fn no_ops_once_submitted() {
        let connector = StubConnector { send_result: Ok("0xhash".to_string()) };
        let policy = SimplePolicy::new();
        let mut mtx = mk_tx();
        mtx.mark_submitted("0xalready".into());
        let outcome = policy.execute(&ctx(), &connector, &mut mtx).await;
        assert_eq!(outcome.update, PolicyUpdate::No);
        assert_eq!(mtx.transaction_hash.as_deref(), Some("0xalready"));
    }

    #[tokio::test]
    async fn deletes_unsubmitted_transaction_on_request() {
        let connector = StubConnector { send_result: Ok("0xhash".to_string()) };
        let policy = SimplePolicy::new();
        let mut mtx = mk_tx();
        mtx.delete_requested = Some(chrono::Utc::now());
        let outcome = policy.execute(&ctx(), &connector, &mut mtx).await;
        assert_eq!(outcome.update, PolicyUpdate::Delete);
    }

    #[tokio::test]
    async fn reports_send_failure_without_advancing() {
        let connector = StubConnector {
            send_result: Err(ConnectorError::new(ConnectorErrorReason::Transient, "rpc timeout"))
        };
        let policy = SimplePolicy::new();
        let mut mtx = mk_tx();
        let outcome = policy.execute(&ctx(), &connector, &mut mtx).await;
        assert_eq!(outcome.update, PolicyUpdate::No);
        assert!(outcome.error.is_some());
        assert!(mtx.transaction_hash.is_none());
    }

    #[test]
    fn registry_builds_simple_by_name() {
        let registry = PolicyRegistry::new();
        assert!(registry.build("simple").is_some());
        assert!(registry.build("nonexistent").is_none());
    }
}
