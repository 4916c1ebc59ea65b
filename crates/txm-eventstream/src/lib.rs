//! Event stream runtime (C7) and name registry (C8).
//!
//! Grounded on `pkg/fftm/stream_manager.go` and `pkg/fftm/eventstream.go` of
//! the original implementation for the per-stream state machine and batched
//! delivery, and on the teacher's `crates/eth/src/manager.rs` for the
//! supervisor-task-plus-handle shape (a spawned loop draining
//! connector-pushed channels, driven from outside through a command queue).

pub mod delivery;
pub mod registry;

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use txm_connector::{Connector, EventStreamStartRequest, ListenerEvent};
use txm_persistence::Persistence;
use txm_types::{
    error::{TmError, ValidationError},
    ethcompat::apply_eth_compat_methods,
    DeliveryMode, EventStream, Listener, ListenerId, PageRequest, SortDirection, StreamConfig,
    StreamId, StreamStatus
};

pub use registry::NameRegistry;

/// Rejects a stream configuration before anything is reserved or persisted:
/// an empty or SSRF-unsafe webhook url, or a distribution mode missing the
/// fields it needs to actually deliver anything.
fn validate_stream_config(config: &StreamConfig) -> Result<(), TmError> {
    match &config.delivery {
        DeliveryMode::Webhook { url, .. } => {
            if url.trim().is_empty() {
                return Err(TmError::Validation(ValidationError::WebhookUrlRequired));
            }
            let parsed = url::Url::parse(url)
                .map_err(|_| TmError::Validation(ValidationError::WebhookUrlRequired))?;
            let host = parsed
                .host_str()
                .ok_or_else(|| TmError::Validation(ValidationError::WebhookUrlRequired))?;
            if is_blocked_webhook_host(host) {
                return Err(TmError::Validation(ValidationError::BlockedWebhookAddress {
                    host: host.to_string()
                }));
            }
        }
        DeliveryMode::WebSocket { topic } => {
            if topic.trim().is_empty() {
                return Err(TmError::Validation(ValidationError::InvalidDistributionMode {
                    mode: "websocket".to_string()
                }));
            }
        }
    }
    Ok(())
}

/// Blocks loopback, unspecified, link-local and private-range hosts so a
/// webhook can't be pointed at the connector's own internal network.
fn is_blocked_webhook_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<std::net::IpAddr>() {
        Ok(std::net::IpAddr::V4(v4)) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        Ok(std::net::IpAddr::V6(v6)) => v6.is_loopback() || v6.is_unspecified(),
        Err(_) => false
    }
}

struct RunningStream {
    cancel: CancellationToken,
    status: Arc<Mutex<StreamStatus>>
}

/// Owns every active stream's supervisor task plus the shared name registry.
/// Holding a stream's name reservation and its runtime task in the same
/// place keeps "stream exists" and "name is reserved" from drifting apart.
pub struct EventStreamManager {
    persistence: Arc<dyn Persistence>,
    connector:   Arc<dyn Connector>,
    registry:    NameRegistry,
    client:      reqwest::Client,
    ws:          broadcast::Sender<serde_json::Value>,
    running:     Mutex<HashMap<StreamId, RunningStream>>
}

impl EventStreamManager {
    pub fn new(persistence: Arc<dyn Persistence>, connector: Arc<dyn Connector>) -> Self {
        let (ws, _rx) = broadcast::channel(1024);
        Self {
            persistence,
            connector,
            registry: NameRegistry::new(),
            client: reqwest::Client::new(),
            ws,
            running: Mutex::new(HashMap::new())
        }
    }

    pub fn subscribe_ws(&self) -> broadcast::Receiver<serde_json::Value> {
        self.ws.subscribe()
    }

    pub fn stream_status(&self, id: StreamId) -> StreamStatus {
        self.running
            .lock()
            .get(&id)
            .map(|r| *r.status.lock())
            .unwrap_or(StreamStatus::Stopped)
    }

    pub async fn create_stream(&self, name: String, config: StreamConfig) -> Result<EventStream, TmError> {
        validate_stream_config(&config)?;
        let stream = EventStream::new(name, config);
        self.registry.reserve(&stream.name, stream.id)?;
        if let Err(e) = self.persistence.write_stream(&stream).await {
            self.registry.release(&stream.name);
            return Err(e);
        }
        Ok(stream)
    }

    pub async fn rename_stream(&self, id: StreamId, new_name: String) -> Result<(), TmError> {
        let Some(mut stream) = self.persistence.get_stream(id).await? else {
            return Err(TmError::NotFound(txm_types::NotFoundKind::Stream, id.to_string()));
        };
        self.registry.rename(&stream.name, &new_name, id)?;
        stream.name = new_name;
        self.persistence.write_stream(&stream).await
    }

    /// Starts (or restarts) a stream's supervisor task. No-op if it's
    /// already running.
    pub async fn start_stream(&self, id: StreamId) -> Result<(), TmError> {
        if self.running.lock().contains_key(&id) {
            return Ok(());
        }
        let Some(stream) = self.persistence.get_stream(id).await? else {
            return Err(TmError::NotFound(txm_types::NotFoundKind::Stream, id.to_string()));
        };
        let page = PageRequest::new(None, i64::MAX, SortDirection::Ascending)?;
        let listeners = self.persistence.list_stream_listeners(page, id).await?;

        let cancel = CancellationToken::new();
        let status = Arc::new(Mutex::new(StreamStatus::Starting));
        let ctx = RunCtx {
            persistence: self.persistence.clone(),
            connector: self.connector.clone(),
            client: self.client.clone(),
            ws: self.ws.clone(),
            stream,
            listeners,
            status: status.clone(),
            cancel: cancel.clone()
        };
        let task_cancel = cancel.clone();
        tokio::spawn(async move { run_stream(ctx, task_cancel).await });
        self.running.lock().insert(id, RunningStream { cancel, status });
        Ok(())
    }

    pub async fn stop_stream(&self, id: StreamId) -> Result<(), TmError> {
        if let Some(running) = self.running.lock().remove(&id) {
            running.cancel.cancel();
        }
        self.connector.event_stream_stopped(id).await.map_err(|e| TmError::Transient(e.message))
    }

    pub async fn delete_stream(&self, id: StreamId) -> Result<(), TmError> {
        self.stop_stream(id).await.ok();
        let Some(stream) = self.persistence.get_stream(id).await? else { return Ok(()) };
        self.persistence.delete_stream(id).await?;
        self.persistence.delete_checkpoint(id).await?;
        self.registry.release(&stream.name);
        if let Some(running) = self.running.lock().get(&id) {
            *running.status.lock() = StreamStatus::Deleted;
        }
        Ok(())
    }

    pub async fn add_listener(
        &self,
        stream_id: StreamId,
        name: String,
        options: serde_json::Value
    ) -> Result<Listener, TmError> {
        let options = apply_eth_compat_methods(options);
        let verified = self
            .connector
            .event_listener_verify_options(&options)
            .await
            .map_err(|e| TmError::Transient(e.message))?;
        let mut listener = Listener::new(name, stream_id, verified);
        self.connector
            .event_listener_add(stream_id, &listener)
            .await
            .map_err(|e| TmError::Transient(e.message))?;
        listener.checkpoint = self
            .connector
            .event_listener_hwm(stream_id, listener.id)
            .await
            .map_err(|e| TmError::Transient(e.message))?;
        self.persistence.write_listener(&listener).await?;
        Ok(listener)
    }

    pub async fn remove_listener(&self, stream_id: StreamId, listener_id: ListenerId) -> Result<(), TmError> {
        self.connector
            .event_listener_remove(stream_id, listener_id)
            .await
            .map_err(|e| TmError::Transient(e.message))?;
        self.persistence.delete_listener(listener_id).await
    }
}

struct RunCtx {
    persistence: Arc<dyn Persistence>,
    connector:   Arc<dyn Connector>,
    client:      reqwest::Client,
    ws:          broadcast::Sender<serde_json::Value>,
    stream:      EventStream,
    listeners:   Vec<Listener>,
    status:      Arc<Mutex<StreamStatus>>,
    cancel:      CancellationToken
}

/// Drives one stream from `Starting` through `Started` until `cancel` fires,
/// batching listener events per the stream's [`txm_types::BatchConfig`] and
/// draining the block-hash channel unconditionally so the connector is never
/// blocked on a full channel even when this stream has no interest in
/// block-level notifications.
async fn run_stream(ctx: RunCtx, cancel: CancellationToken) {
    let (event_tx, mut event_rx) = mpsc::channel::<ListenerEvent>(256);
    let (block_tx, mut block_rx) = mpsc::channel::<String>(256);

    let req = EventStreamStartRequest {
        stream_id: ctx.stream.id,
        cancel: cancel.clone(),
        listener_events: event_tx,
        block_hashes: block_tx,
        listeners: ctx.listeners.clone()
    };
    if let Err(e) = ctx.connector.event_stream_start(req).await {
        error!(stream_id = %ctx.stream.id, error = %e, "stream failed to start");
        *ctx.status.lock() = StreamStatus::Stopped;
        return;
    }
    *ctx.status.lock() = StreamStatus::Started;
    debug!(stream_id = %ctx.stream.id, "stream started");

    let batch_size = ctx.stream.config.batch.batch_size;
    let batch_timeout = Duration::from_millis(ctx.stream.config.batch.batch_timeout_ms);
    let mut batch: Vec<ListenerEvent> = Vec::with_capacity(batch_size);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(raw) = block_rx.recv() => {
                debug!(stream_id = %ctx.stream.id, block_hash = %raw, "observed block");
            }
            maybe_event = event_rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        batch.push(event);
                        if batch.len() >= batch_size {
                            flush(&ctx, &mut batch).await;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep(batch_timeout), if !batch.is_empty() => {
                flush(&ctx, &mut batch).await;
            }
        }
    }

    if !batch.is_empty() {
        flush(&ctx, &mut batch).await;
    }
    *ctx.status.lock() = StreamStatus::Stopping;
    if let Err(e) = ctx.connector.event_stream_stopped(ctx.stream.id).await {
        warn!(stream_id = %ctx.stream.id, error = %e, "error acknowledging stream stop");
    }
    *ctx.status.lock() = StreamStatus::Stopped;
}

/// Delivers one batch, retrying with exponential backoff until it succeeds
/// or the stream is cancelled — a batch is never dropped on failure, since
/// the channel it came from has no way to hand it back.
async fn flush(ctx: &RunCtx, batch: &mut Vec<ListenerEvent>) {
    let taken = std::mem::take(batch);
    let checkpoint = taken.iter().rev().find_map(|e| e.checkpoint.clone());
    let payloads: Vec<serde_json::Value> = taken.into_iter().map(|e| e.data).collect();

    let mut backoff = Duration::from_millis(100);
    let max_backoff = Duration::from_secs(30);
    loop {
        match delivery::deliver(&ctx.client, &ctx.ws, &ctx.stream.config.delivery, payloads.clone()).await {
            Ok(()) => break,
            Err(e) => {
                warn!(stream_id = %ctx.stream.id, error = %e, ?backoff, "event batch delivery failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = ctx.cancel.cancelled() => {
                        warn!(stream_id = %ctx.stream.id, "stream cancelled with an un-acked batch still pending");
                        return;
                    }
                }
                backoff = (backoff * 2).min(max_backoff);
            }
        }
    }

    if let Some(checkpoint) = checkpoint {
        if let Err(e) = ctx.persistence.write_checkpoint(ctx.stream.id, checkpoint).await {
            warn!(stream_id = %ctx.stream.id, error = %e, "failed to persist checkpoint after delivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use txm_types::{BatchConfig, DeliveryMode};

    use super::*;

    #[test]
    fn default_status_for_unknown_stream_is_stopped() {
        let persistence: Arc<dyn Persistence> = Arc::new(txm_persistence::memory::MemoryPersistence::new());
        let manager = EventStreamManager::new(persistence, fake_connector());
        assert_eq!(manager.stream_status(StreamId::new()), StreamStatus::Stopped);
    }

    #[tokio::test]
    async fn create_stream_reserves_name() {
        let persistence: Arc<dyn Persistence> = Arc::new(txm_persistence::memory::MemoryPersistence::new());
        let manager = EventStreamManager::new(persistence, fake_connector());
        let config = StreamConfig {
            delivery: DeliveryMode::WebSocket { topic: "t".into() },
            batch: BatchConfig::default()
        };
        manager.create_stream("s1".into(), config.clone()).await.unwrap();
        let err = manager.create_stream("s1".into(), config).await.unwrap_err();
        assert_eq!(err.kind(), "name_in_use");
    }

    #[tokio::test]
    async fn create_stream_rejects_empty_webhook_url() {
        let persistence: Arc<dyn Persistence> = Arc::new(txm_persistence::memory::MemoryPersistence::new());
        let manager = EventStreamManager::new(persistence, fake_connector());
        let config = StreamConfig {
            delivery: DeliveryMode::Webhook { url: "".into(), headers: None },
            batch: BatchConfig::default()
        };
        let err = manager.create_stream("s1".into(), config).await.unwrap_err();
        assert_eq!(err.kind(), "webhook_url_required");
    }

    #[tokio::test]
    async fn create_stream_rejects_loopback_webhook_host() {
        let persistence: Arc<dyn Persistence> = Arc::new(txm_persistence::memory::MemoryPersistence::new());
        let manager = EventStreamManager::new(persistence, fake_connector());
        let config = StreamConfig {
            delivery: DeliveryMode::Webhook { url: "http://127.0.0.1:9999/hook".into(), headers: None },
            batch: BatchConfig::default()
        };
        let err = manager.create_stream("s1".into(), config).await.unwrap_err();
        assert_eq!(err.kind(), "blocked_webhook_address");
    }

    #[tokio::test]
    async fn create_stream_rejects_empty_websocket_topic() {
        let persistence: Arc<dyn Persistence> = Arc::new(txm_persistence::memory::MemoryPersistence::new());
        let manager = EventStreamManager::new(persistence, fake_connector());
        let config = StreamConfig {
            delivery: DeliveryMode::WebSocket { topic: "".into() },
            batch: BatchConfig::default()
        };
        let err = manager.create_stream("s1".into(), config).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_distribution_mode");
    }

    #[tokio::test]
    async fn create_stream_accepts_public_webhook_host() {
        let persistence: Arc<dyn Persistence> = Arc::new(txm_persistence::memory::MemoryPersistence::new());
        let manager = EventStreamManager::new(persistence, fake_connector());
        let config = StreamConfig {
            delivery: DeliveryMode::Webhook { url: "https://example.com/hook".into(), headers: None },
            batch: BatchConfig::default()
        };
        assert!(manager.create_stream("s1".into(), config).await.is_ok());
    }

    fn fake_connector() -> Arc<dyn Connector> {
        use async_trait::async_trait;
        use serde_json::Value;
        use txm_connector::{ConnectorError, PreparedTransaction};
        use txm_types::{ids::Nonce, Receipt, TxHash};

        struct Noop;
        #[async_trait]
        impl Connector for Noop {
            async fn next_nonce_for_signer(&self, _signer: &str) -> Result<Nonce, ConnectorError> {
                unimplemented!()
            }

            async fn transaction_send(
                &self,
                _prepared: PreparedTransaction
            ) -> Result<TxHash, ConnectorError> {
                unimplemented!()
            }

            async fn transaction_receipt(&self, _hash: &str) -> Result<Option<Receipt>, ConnectorError> {
                unimplemented!()
            }

            async fn event_stream_start(
                &self,
                _req: EventStreamStartRequest
            ) -> Result<(), ConnectorError> {
                Ok(())
            }

            async fn event_stream_stopped(&self, _stream_id: StreamId) -> Result<(), ConnectorError> {
                Ok(())
            }

            async fn event_listener_verify_options(
                &self,
                options: &Value
            ) -> Result<Value, ConnectorError> {
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
        Arc::new(Noop)
    }
}
