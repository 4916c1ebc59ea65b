//! The process-wide stream name registry (C8).
//!
//! Grounded on `pkg/fftm/stream_manager.go` of the original implementation,
//! which reserves a stream's name before the persistence write and releases
//! the reservation if that write fails, so a crash between the two never
//! leaves a name permanently unusable.

use std::collections::HashMap;

use parking_lot::Mutex;
use txm_types::{
    error::{ConflictError, TmError},
    StreamId
};

#[derive(Default)]
pub struct NameRegistry {
    owners: Mutex<HashMap<String, StreamId>>
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `name` for `owner`. Idempotent if `owner` already holds it;
    /// conflicts if anyone else does.
    pub fn reserve(&self, name: &str, owner: StreamId) -> Result<(), TmError> {
        let mut owners = self.owners.lock();
        match owners.get(name) {
            Some(existing) if *existing != owner => {
                Err(TmError::Conflict(ConflictError::NameInUse { name: name.to_string() }))
            }
            _ => {
                owners.insert(name.to_string(), owner);
                Ok(())
            }
        }
    }

    pub fn release(&self, name: &str) {
        self.owners.lock().remove(name);
    }

    /// Atomically moves `owner`'s name from `old` to `new`: reserves `new`
    /// first, and only releases `old` once that succeeds, so a collision on
    /// `new` leaves the stream under its previous name rather than nameless.
    pub fn rename(&self, old: &str, new: &str, owner: StreamId) -> Result<(), TmError> {
        if old == new {
            return Ok(());
        }
        self.reserve(new, owner)?;
        self.release(old);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_owner_cannot_reserve_same_name() {
        let registry = NameRegistry::new();
        let a = StreamId::new();
        let b = StreamId::new();
        registry.reserve("stream-a", a).unwrap();
        let err = registry.reserve("stream-a", b).unwrap_err();
        assert_eq!(err.kind(), "name_in_use");
    }

    #[test]
    fn rename_rolls_back_on_collision() {
        let registry = NameRegistry::new();
        let a = StreamId::new();
        let b = StreamId::new();
        registry.reserve("stream-a", a).unwrap();
        registry.reserve("stream-b", b).unwrap();
        let err = registry.rename("stream-a", "stream-b", a).unwrap_err();
        assert_eq!(err.kind(), "name_in_use");
        // "stream-a" still belongs to `a` — the failed rename didn't release it.
        assert!(registry.reserve("stream-a", b).is_err());
    }

    #[test]
    fn release_then_reserve_by_new_owner_succeeds() {
        let registry = NameRegistry::new();
        let a = StreamId::new();
        let b = StreamId::new();
        registry.reserve("stream-a", a).unwrap();
        registry.release("stream-a");
        assert!(registry.reserve("stream-a", b).is_ok());
    }
}
