use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::StreamId;

/// Lifecycle state of an [`EventStream`] runtime.
///
/// `Stopped -> Starting -> Started -> Stopping -> Stopped`, plus the terminal
/// `Deleted`, reachable only from `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Stopped,
    Starting,
    Started,
    Stopping,
    Deleted
}

/// How a stream delivers batches of events to the outside world.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeliveryMode {
    Webhook { url: String, headers: Option<Value> },
    WebSocket { topic: String }
}

/// Batching policy: how many events (or how long) to accumulate before a
/// delivery attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatchConfig {
    pub batch_size:       usize,
    pub batch_timeout_ms: u64
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { batch_size: 50, batch_timeout_ms: 500 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub delivery: DeliveryMode,
    pub batch:    BatchConfig
}

/// A name-unique, time-ordered event stream definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStream {
    pub id:        StreamId,
    pub name:      String,
    pub suspended: bool,
    pub config:    StreamConfig,
    pub updated:   DateTime<Utc>
}

impl EventStream {
    pub fn new(name: impl Into<String>, config: StreamConfig) -> Self {
        Self { id: StreamId::new(), name: name.into(), suspended: false, config, updated: Utc::now() }
    }
}
