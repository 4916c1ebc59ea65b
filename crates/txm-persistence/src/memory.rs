use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use txm_types::{
    error::{ConflictError, NotFoundKind, TmError},
    ids::Nonce,
    EventStream, Listener, ListenerId, ManagedTx, PageRequest, SequenceId, SortDirection,
    StreamId, TxId
};

use crate::Persistence;

#[derive(Default)]
struct Inner {
    checkpoints:     HashMap<StreamId, serde_json::Value>,
    streams:         HashMap<StreamId, EventStream>,
    listeners:       HashMap<ListenerId, Listener>,
    transactions:    HashMap<TxId, ManagedTx>,
    by_signer_nonce: HashMap<(String, Nonce), TxId>
}

/// Reference, process-local implementation of the persistence contract.
/// Not a production backend (§1 out of scope) — intended for composing the
/// rest of the system in-process and for the unit tests in this workspace.
#[derive(Default)]
pub struct MemoryPersistence {
    inner: Mutex<Inner>
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Pages `items` (already paired with a sort key `K`) by `after`/`limit`/`dir`.
/// `after` is an exclusive cursor: the returned page never contains it.
fn paginate<K: Ord + Copy, T>(mut items: Vec<(K, T)>, page: &PageRequest<K>) -> Vec<T> {
    match page.dir {
        SortDirection::Ascending => items.sort_by(|a, b| a.0.cmp(&b.0)),
        SortDirection::Descending => items.sort_by(|a, b| b.0.cmp(&a.0))
    }
    let start = match page.after {
        Some(cursor) => items
            .iter()
            .position(|(k, _)| match page.dir {
                SortDirection::Ascending => *k > cursor,
                SortDirection::Descending => *k < cursor
            })
            .unwrap_or(items.len()),
        None => 0
    };
    items.into_iter().skip(start).take(page.limit).map(|(_, v)| v).collect()
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn write_checkpoint(&self, stream_id: StreamId, blob: serde_json::Value) -> Result<(), TmError> {
        self.inner.lock().checkpoints.insert(stream_id, blob);
        Ok(())
    }

    async fn get_checkpoint(&self, stream_id: StreamId) -> Result<Option<serde_json::Value>, TmError> {
        Ok(self.inner.lock().checkpoints.get(&stream_id).cloned())
    }

    async fn delete_checkpoint(&self, stream_id: StreamId) -> Result<(), TmError> {
        self.inner.lock().checkpoints.remove(&stream_id);
        Ok(())
    }

    async fn list_streams(&self, page: PageRequest<StreamId>) -> Result<Vec<EventStream>, TmError> {
        let inner = self.inner.lock();
        let items = inner.streams.iter().map(|(id, s)| (*id, s.clone())).collect();
        Ok(paginate(items, &page))
    }

    async fn get_stream(&self, id: StreamId) -> Result<Option<EventStream>, TmError> {
        Ok(self.inner.lock().streams.get(&id).cloned())
    }

    async fn write_stream(&self, stream: &EventStream) -> Result<(), TmError> {
        self.inner.lock().streams.insert(stream.id, stream.clone());
        Ok(())
    }

    async fn delete_stream(&self, id: StreamId) -> Result<(), TmError> {
        self.inner.lock().streams.remove(&id);
        Ok(())
    }

    async fn list_listeners(&self, page: PageRequest<ListenerId>) -> Result<Vec<Listener>, TmError> {
        let inner = self.inner.lock();
        let items = inner.listeners.iter().map(|(id, l)| (*id, l.clone())).collect();
        Ok(paginate(items, &page))
    }

    async fn list_stream_listeners(
        &self,
        page: PageRequest<ListenerId>,
        stream_id: StreamId
    ) -> Result<Vec<Listener>, TmError> {
        let inner = self.inner.lock();
        let items = inner
            .listeners
            .iter()
            .filter(|(_, l)| l.stream_id == stream_id)
            .map(|(id, l)| (*id, l.clone()))
            .collect();
        Ok(paginate(items, &page))
    }

    async fn get_listener(&self, id: ListenerId) -> Result<Option<Listener>, TmError> {
        Ok(self.inner.lock().listeners.get(&id).cloned())
    }

    async fn write_listener(&self, listener: &Listener) -> Result<(), TmError> {
        self.inner.lock().listeners.insert(listener.id, listener.clone());
        Ok(())
    }

    async fn delete_listener(&self, id: ListenerId) -> Result<(), TmError> {
        self.inner.lock().listeners.remove(&id);
        Ok(())
    }

    async fn list_transactions_by_create_time(
        &self,
        page: PageRequest<TxId>
    ) -> Result<Vec<ManagedTx>, TmError> {
        let inner = self.inner.lock();
        // Order by (created, id) but page on the id cursor: locate the
        // cursor's `created` timestamp first, then delegate to the same
        // exclusive-cursor scan used elsewhere, keyed on `created`.
        let cursor_created = match &page.after {
            Some(id) => match inner.transactions.get(id) {
                Some(tx) => Some(tx.created),
                None => return Ok(Vec::new())
            },
            None => None
        };
        let items = inner
            .transactions
            .values()
            .map(|tx| (tx.created, tx.clone()))
            .collect();
        let keyed_page = PageRequest { after: cursor_created, limit: page.limit, dir: page.dir };
        Ok(paginate(items, &keyed_page))
    }

    async fn list_transactions_by_nonce(
        &self,
        signer: &str,
        page: PageRequest<Nonce>
    ) -> Result<Vec<ManagedTx>, TmError> {
        let inner = self.inner.lock();
        let items = inner
            .transactions
            .values()
            .filter(|tx| tx.signer == signer)
            .map(|tx| (tx.nonce, tx.clone()))
            .collect();
        Ok(paginate(items, &page))
    }

    async fn list_transactions_pending(
        &self,
        page: PageRequest<SequenceId>
    ) -> Result<Vec<ManagedTx>, TmError> {
        let inner = self.inner.lock();
        let items = inner
            .transactions
            .values()
            .filter(|tx| tx.status == txm_types::TxStatus::Pending)
            .map(|tx| (tx.sequence_id, tx.clone()))
            .collect();
        Ok(paginate(items, &page))
    }

    async fn get_transaction_by_id(&self, id: &str) -> Result<Option<ManagedTx>, TmError> {
        Ok(self.inner.lock().transactions.get(id).cloned())
    }

    async fn get_transaction_by_nonce(
        &self,
        signer: &str,
        nonce: Nonce
    ) -> Result<Option<ManagedTx>, TmError> {
        let inner = self.inner.lock();
        let Some(id) = inner.by_signer_nonce.get(&(signer.to_string(), nonce)) else {
            return Ok(None);
        };
        Ok(inner.transactions.get(id).cloned())
    }

    async fn write_transaction(&self, tx: &ManagedTx, is_new: bool) -> Result<(), TmError> {
        let mut inner = self.inner.lock();
        if is_new && inner.transactions.contains_key(&tx.id) {
            return Err(TmError::Conflict(ConflictError::DuplicateId { id: tx.id.clone() }));
        }
        let key = (tx.signer.clone(), tx.nonce);
        if let Some(existing_id) = inner.by_signer_nonce.get(&key) {
            if existing_id != &tx.id {
                return Err(TmError::Conflict(ConflictError::DuplicateId {
                    id: format!("{}@{}", tx.signer, tx.nonce)
                }));
            }
        }
        inner.by_signer_nonce.insert(key, tx.id.clone());
        inner.transactions.insert(tx.id.clone(), tx.clone());
        Ok(())
    }

    async fn delete_transaction(&self, id: &str) -> Result<(), TmError> {
        let mut inner = self.inner.lock();
        if let Some(tx) = inner.transactions.remove(id) {
            inner.by_signer_nonce.remove(&(tx.signer, tx.nonce));
        }
        Ok(())
    }

    async fn close(&self) {}
}

/// Convenience for callers that want the `not found` boundary key rather than
/// `Option::None` (used by RPC handlers, not by the scheduler/allocator).
pub fn not_found<T>(kind: NotFoundKind, id: impl Into<String>) -> Result<T, TmError> {
    Err(TmError::NotFound(kind, id.into()))
}

#[cfg(test)]
mod tests {
    use txm_types::{tx::TransactionRequest, SortDirection};

    use super::*;

    fn mk_tx(id: &str, signer: &str, nonce: u64) -> ManagedTx {
        ManagedTx::new(
            id.to_string(),
            signer.to_string(),
            Nonce::from(nonce),
            TransactionRequest { from: signer.to_string(), payload: serde_json::json!({}) }
        )
    }

    #[tokio::test]
    async fn write_transaction_rejects_duplicate_id_when_new() {
        let p = MemoryPersistence::new();
        let tx = mk_tx("tx1", "0xA", 1);
        p.write_transaction(&tx, true).await.unwrap();
        let err = p.write_transaction(&tx, true).await.unwrap_err();
        assert_eq!(err.kind(), "duplicate_id");
        // store unchanged: still exactly one row under tx1.
        assert!(p.get_transaction_by_id("tx1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn write_transaction_upserts_when_not_new() {
        let p = MemoryPersistence::new();
        let mut tx = mk_tx("tx1", "0xA", 1);
        p.write_transaction(&tx, true).await.unwrap();
        tx.status = txm_types::TxStatus::Succeeded;
        p.write_transaction(&tx, false).await.unwrap();
        let got = p.get_transaction_by_id("tx1").await.unwrap().unwrap();
        assert_eq!(got.status, txm_types::TxStatus::Succeeded);
    }

    #[tokio::test]
    async fn pagination_cursor_is_exclusive() {
        let p = MemoryPersistence::new();
        for i in 0..3u64 {
            p.write_transaction(&mk_tx(&format!("tx{i}"), "0xA", i), true).await.unwrap();
        }
        let page = PageRequest::new(Some(Nonce::from(0u64)), 10, SortDirection::Ascending).unwrap();
        let got = p.list_transactions_by_nonce("0xA", page).await.unwrap();
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|tx| tx.nonce > Nonce::from(0u64)));
    }
}
