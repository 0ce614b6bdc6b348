//! # in-memory storage
//!
//! why: fast storage for tests that still behaves like a disk across restarts
//! relations: implements the Storage trait from lib.rs
//! what: InMemoryStorage, a cloneable handle over shared encoded state

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use raft_core::{PersistentState, Snapshot};

use crate::{check_anchor, Storage, StorageError};

#[derive(Debug, Default)]
struct Inner {
    /// state encoded exactly as it would be written to disk
    state: Option<Vec<u8>>,
    snapshot: Option<Snapshot>,
}

/// in-memory storage for testing
///
/// clones share the same contents, so a test can hand one clone to a node,
/// drop the node, and restart a new one from another clone.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStorage {
    /// create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for InMemoryStorage {
    fn save(&mut self, state: &PersistentState) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(state)?;
        self.lock().state = Some(bytes);
        Ok(())
    }

    fn save_with_snapshot(
        &mut self,
        state: &PersistentState,
        snapshot: &Snapshot,
    ) -> Result<(), StorageError> {
        check_anchor(state, snapshot)?;
        let bytes = serde_json::to_vec(state)?;
        let mut inner = self.lock();
        inner.state = Some(bytes);
        inner.snapshot = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistentState>, StorageError> {
        match &self.lock().state {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        Ok(self.lock().snapshot.clone())
    }

    fn state_size(&self) -> usize {
        self.lock().state.as_ref().map_or(0, Vec::len)
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        *self.lock() = Inner::default();
        Ok(())
    }
}
