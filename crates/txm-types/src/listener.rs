use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ListenerId, StreamId};

/// A listener belongs to exactly one stream; its name is unique within that
/// stream (not globally). Lifecycle follows the owning stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listener {
    pub id:         ListenerId,
    pub name:       String,
    pub stream_id:  StreamId,
    /// Filter/options blob — opaque to the core beyond the boundary-layer
    /// `eth_compat` merge transform applied before persistence (see
    /// `txm_types::ethcompat`).
    pub options:    Value,
    /// Opaque, stream-type specific resumable cursor, overwritten in place.
    pub checkpoint: Option<Value>
}

impl Listener {
    pub fn new(name: impl Into<String>, stream_id: StreamId, options: Value) -> Self {
        Self { id: ListenerId::new(), name: name.into(), stream_id, options, checkpoint: None }
    }
}
