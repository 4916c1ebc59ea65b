//! The JSON-RPC surface. A thin translation layer: every method borrows the
//! shared [`Manager`] and maps [`TmError`] to a stable boundary error code.
//!
//! Grounded on the teacher's `crates/rpc/src/impls/orders.rs` (one struct
//! wrapping a shared handle, one `#[async_trait]` impl of a `#[rpc(server)]`
//! trait, errors mapped through a single helper).

use std::sync::Arc;

use jsonrpsee::{
    core::{async_trait, RpcResult},
    proc_macros::rpc,
    types::{ErrorObject, ErrorObjectOwned}
};
use serde_json::Value;
use txm_scheduler::PolicyApiOutcome;
use txm_types::{
    error::TmError, EventStream, Listener, ListenerId, ManagedTx, PageRequest, SortDirection,
    StreamConfig, StreamId, TransactionRequest
};

use crate::manager::Manager;

fn map_err(e: TmError) -> ErrorObjectOwned {
    ErrorObject::owned(-32000, e.kind(), Some(e.to_string()))
}

#[rpc(server, namespace = "tx")]
pub trait TxmApi {
    #[method(name = "submit")]
    async fn submit_transaction(&self, request: TransactionRequest) -> RpcResult<ManagedTx>;

    #[method(name = "get")]
    async fn get_transaction(&self, id: String) -> RpcResult<Option<ManagedTx>>;

    #[method(name = "list")]
    async fn list_transactions(
        &self,
        after: Option<String>,
        limit: i64,
        descending: bool
    ) -> RpcResult<Vec<ManagedTx>>;

    #[method(name = "delete")]
    async fn delete_transaction(&self, id: String) -> RpcResult<PolicyApiOutcome>;

    #[method(name = "suspend")]
    async fn suspend_transaction(&self, id: String) -> RpcResult<()>;

    #[method(name = "createStream")]
    async fn create_stream(&self, name: String, config: StreamConfig) -> RpcResult<EventStream>;

    #[method(name = "startStream")]
    async fn start_stream(&self, id: StreamId) -> RpcResult<()>;

    #[method(name = "stopStream")]
    async fn stop_stream(&self, id: StreamId) -> RpcResult<()>;

    #[method(name = "deleteStream")]
    async fn delete_stream(&self, id: StreamId) -> RpcResult<()>;

    #[method(name = "renameStream")]
    async fn rename_stream(&self, id: StreamId, new_name: String) -> RpcResult<()>;

    #[method(name = "addListener")]
    async fn add_listener(&self, stream_id: StreamId, name: String, options: Value) -> RpcResult<Listener>;

    #[method(name = "removeListener")]
    async fn remove_listener(&self, stream_id: StreamId, listener_id: ListenerId) -> RpcResult<()>;
}

pub struct TxmApiImpl {
    manager: Arc<Manager>
}

impl TxmApiImpl {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl TxmApiServer for TxmApiImpl {
    async fn submit_transaction(&self, request: TransactionRequest) -> RpcResult<ManagedTx> {
        self.manager.submit_transaction(request).await.map_err(map_err)
    }

    async fn get_transaction(&self, id: String) -> RpcResult<Option<ManagedTx>> {
        self.manager.get_transaction(&id).await.map_err(map_err)
    }

    async fn list_transactions(
        &self,
        after: Option<String>,
        limit: i64,
        descending: bool
    ) -> RpcResult<Vec<ManagedTx>> {
        let dir = if descending { SortDirection::Descending } else { SortDirection::Ascending };
        let page = PageRequest::new(after, limit, dir).map_err(map_err)?;
        self.manager.list_transactions(page).await.map_err(map_err)
    }

    async fn delete_transaction(&self, id: String) -> RpcResult<PolicyApiOutcome> {
        self.manager.delete_transaction(id).await.map_err(map_err)
    }

    async fn suspend_transaction(&self, id: String) -> RpcResult<()> {
        self.manager.suspend_transaction(id).await.map_err(map_err)
    }

    async fn create_stream(&self, name: String, config: StreamConfig) -> RpcResult<EventStream> {
        self.manager.create_stream(name, config).await.map_err(map_err)
    }

    async fn start_stream(&self, id: StreamId) -> RpcResult<()> {
        self.manager.start_stream(id).await.map_err(map_err)
    }

    async fn stop_stream(&self, id: StreamId) -> RpcResult<()> {
        self.manager.stop_stream(id).await.map_err(map_err)
    }

    async fn delete_stream(&self, id: StreamId) -> RpcResult<()> {
        self.manager.delete_stream(id).await.map_err(map_err)
    }

    async fn rename_stream(&self, id: StreamId, new_name: String) -> RpcResult<()> {
        self.manager.rename_stream(id, new_name).await.map_err(map_err)
    }

    async fn add_listener(&self, stream_id: StreamId, name: String, options: Value) -> RpcResult<Listener> {
        self.manager.add_listener(stream_id, name, options).await.map_err(map_err)
    }

    async fn remove_listener(&self, stream_id: StreamId, listener_id: ListenerId) -> RpcResult<()> {
        self.manager.remove_listener(stream_id, listener_id).await.map_err(map_err)
    }
}
