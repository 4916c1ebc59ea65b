//! Batch delivery of listener events to a stream's configured sink.
//!
//! Grounded on `pkg/events/webhooks.go` and `pkg/events/websockets.go` of the
//! original implementation, and on the teacher's use of `reqwest` for its own
//! outbound HTTP calls (webhook delivery is the one place this workspace
//! talks HTTP to something other than an RPC client).

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;
use txm_types::{error::TmError, DeliveryMode};

/// Delivers one batch of event payloads. Webhook failures are surfaced to
/// the caller (the stream supervisor retries); a WebSocket send with no
/// subscribers is not an error — there's simply nobody listening right now.
pub async fn deliver(
    client: &reqwest::Client,
    ws: &broadcast::Sender<Value>,
    mode: &DeliveryMode,
    batch: Vec<Value>
) -> Result<(), TmError> {
    match mode {
        DeliveryMode::Webhook { url, headers } => {
            let mut req = client.post(url.as_str()).json(&Value::Array(batch));
            if let Some(Value::Object(map)) = headers {
                for (k, v) in map {
                    if let Some(v) = v.as_str() {
                        req = req.header(k.as_str(), v);
                    }
                }
            }
            let resp = req.send().await.map_err(|e| TmError::Transient(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(TmError::Transient(format!("webhook returned {}", resp.status())));
            }
            Ok(())
        }
        DeliveryMode::WebSocket { topic } => {
            for payload in batch {
                if ws.send(serde_json::json!({ "topic": topic, "data": payload })).is_err() {
                    warn!(%topic, "no websocket subscribers for event delivery");
                }
            }
            Ok(())
        }
    }
}
