//! The façade every outer surface (RPC, the binary's shutdown path) talks
//! to. Wires the nonce allocator, scheduler, and event stream runtime
//! together behind one object.
//!
//! Grounded on `pkg/fftm/manager.go` of the original implementation, which
//! plays the same role: own every subsystem, expose the handful of
//! operations the outer API surfaces, and provide one explicit teardown
//! entrypoint rather than relying on drop order.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use txm_connector::Connector;
use txm_eventstream::EventStreamManager;
use txm_nonce::NonceAllocator;
use txm_persistence::Persistence;
use txm_policy::PolicyEngine;
use txm_scheduler::{ConfirmationTracker, PolicyApiOutcome, Scheduler, SchedulerConfig, SchedulerHandle};
use txm_types::{
    error::{TmError, ValidationError},
    ids::TxId,
    ManagedTx, PageRequest, StreamConfig, StreamId, StreamStatus, TransactionRequest
};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub error_history_count: usize,
    pub scheduler:           SchedulerConfig
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self { error_history_count: 25, scheduler: SchedulerConfig::default() }
    }
}

pub struct Manager {
    persistence:   Arc<dyn Persistence>,
    nonces:        NonceAllocator,
    scheduler:     SchedulerHandle,
    streams:       EventStreamManager,
    error_history_count: usize,
    cancel:        CancellationToken,
    scheduler_task: Mutex<Option<JoinHandle<()>>>
}

impl Manager {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        connector: Arc<dyn Connector>,
        policy: Arc<dyn PolicyEngine>,
        confirm_tracker: Arc<dyn ConfirmationTracker>,
        config: ManagerConfig
    ) -> Arc<Self> {
        let nonces = NonceAllocator::new(persistence.clone(), connector.clone());
        let (scheduler, handle) = Scheduler::new(
            persistence.clone(),
            connector.clone(),
            policy,
            confirm_tracker,
            config.scheduler
        );
        let cancel = CancellationToken::new();
        let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));
        let streams = EventStreamManager::new(persistence.clone(), connector);

        Arc::new(Self {
            persistence,
            nonces,
            scheduler: handle,
            streams,
            error_history_count: config.error_history_count,
            cancel,
            scheduler_task: Mutex::new(Some(scheduler_task))
        })
    }

    pub async fn submit_transaction(&self, request: TransactionRequest) -> Result<ManagedTx, TmError> {
        if request.from.is_empty() {
            return Err(TmError::Validation(ValidationError::MissingField { field: "from" }));
        }
        let request_id = Uuid::new_v4().to_string();
        let locked =
            self.nonces.assign_and_lock_nonce(&self.cancel, request_id.clone(), &request.from).await?;
        let mtx = ManagedTx::new(Uuid::new_v4().to_string(), request.from.clone(), locked.nonce, request);

        if let Err(e) = self.persistence.write_transaction(&mtx, true).await {
            locked.complete();
            return Err(e);
        }
        locked.complete();
        self.scheduler.track_submitted(mtx.clone()).await;
        Ok(mtx)
    }

    pub async fn get_transaction(&self, id: &str) -> Result<Option<ManagedTx>, TmError> {
        self.persistence.get_transaction_by_id(id).await
    }

    pub async fn list_transactions(&self, page: PageRequest<TxId>) -> Result<Vec<ManagedTx>, TmError> {
        self.persistence.list_transactions_by_create_time(page).await
    }

    pub async fn delete_transaction(&self, id: TxId) -> Result<PolicyApiOutcome, TmError> {
        self.scheduler.delete_transaction(id).await
    }

    pub async fn suspend_transaction(&self, id: TxId) -> Result<(), TmError> {
        self.scheduler.suspend_transaction(id).await
    }

    pub fn error_history_count(&self) -> usize {
        self.error_history_count
    }

    pub async fn create_stream(
        &self,
        name: String,
        config: StreamConfig
    ) -> Result<txm_types::EventStream, TmError> {
        self.streams.create_stream(name, config).await
    }

    pub async fn start_stream(&self, id: StreamId) -> Result<(), TmError> {
        self.streams.start_stream(id).await
    }

    pub async fn stop_stream(&self, id: StreamId) -> Result<(), TmError> {
        self.streams.stop_stream(id).await
    }

    pub async fn delete_stream(&self, id: StreamId) -> Result<(), TmError> {
        self.streams.delete_stream(id).await
    }

    pub async fn rename_stream(&self, id: StreamId, new_name: String) -> Result<(), TmError> {
        self.streams.rename_stream(id, new_name).await
    }

    pub async fn add_listener(
        &self,
        stream_id: StreamId,
        name: String,
        options: serde_json::Value
    ) -> Result<txm_types::Listener, TmError> {
        self.streams.add_listener(stream_id, name, options).await
    }

    pub async fn remove_listener(
        &self,
        stream_id: StreamId,
        listener_id: txm_types::ListenerId
    ) -> Result<(), TmError> {
        self.streams.remove_listener(stream_id, listener_id).await
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<serde_json::Value> {
        self.streams.subscribe_ws()
    }

    /// Explicit async teardown, in reverse dependency order: stop the policy
    /// loop first (nothing should be submitting once streams stop
    /// delivering), then every running stream, then the store.
    pub async fn shutdown(&self) {
        info!("shutting down transaction manager");
        self.cancel.cancel();
        if let Some(task) = self.scheduler_task.lock().take() {
            let _ = task.await;
        }

        if let Ok(page) = PageRequest::new(None, i64::MAX, txm_types::SortDirection::Ascending) {
            if let Ok(streams) = self.persistence.list_streams(page).await {
                for stream in streams {
                    let active =
                        matches!(self.streams.stream_status(stream.id), StreamStatus::Started | StreamStatus::Starting);
                    if active {
                        let _ = self.streams.stop_stream(stream.id).await;
                    }
                }
            }
        }
        self.persistence.close().await;
    }
}
