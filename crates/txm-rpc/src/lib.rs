//! The RPC surface and the `Manager` façade it sits on top of.
//!
//! Grounded on the teacher's `bin/testnet/src/main.rs`, which builds a
//! `jsonrpsee::server::ServerBuilder` and starts it against a module built
//! from one or more `*Server` impls.

pub mod manager;
pub mod rpc;

use std::net::SocketAddr;

use jsonrpsee::server::{Server, ServerHandle};
pub use manager::{Manager, ManagerConfig};
pub use rpc::{TxmApiImpl, TxmApiServer};
use tracing::info;

/// Starts the JSON-RPC server on `addr`, serving every method in
/// [`rpc::TxmApiServer`] against `manager`.
pub async fn serve(
    manager: std::sync::Arc<Manager>,
    addr: SocketAddr
) -> Result<ServerHandle, std::io::Error> {
    let server = Server::builder().build(addr).await?;
    let module = TxmApiImpl::new(manager).into_rpc();
    let handle = server.start(module);
    info!(%addr, "rpc server listening");
    Ok(handle)
}
