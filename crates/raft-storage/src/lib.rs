//! # raft-storage
//!
//! why: provide durable persistence for raft state using standard rust fs apis
//! relations: written by raft-runtime after every core step, read back on restart
//! what: Storage trait, StorageError, FileStorage, InMemoryStorage for testing

mod error;
mod file;
mod memory;

pub use error::StorageError;
pub use file::FileStorage;
pub use memory::InMemoryStorage;

use raft_core::{PersistRequest, PersistentState, Snapshot};

/// trait for durable storage of raft state
///
/// every save replaces the previous one as a whole, so a reader never sees a
/// log that disagrees with the term/vote or snapshot it was saved with
pub trait Storage: Send {
    /// durably overwrite {current_term, voted_for, log}
    fn save(&mut self, state: &PersistentState) -> Result<(), StorageError>;

    /// durably overwrite the state together with the snapshot its log is anchored on
    fn save_with_snapshot(
        &mut self,
        state: &PersistentState,
        snapshot: &Snapshot,
    ) -> Result<(), StorageError>;

    /// the last saved state, or None on a cold start
    fn load(&self) -> Result<Option<PersistentState>, StorageError>;

    /// the snapshot paired with the last saved state, if compaction has happened
    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError>;

    /// encoded size in bytes of the last saved state (snapshot excluded)
    fn state_size(&self) -> usize;

    /// forget everything
    fn clear(&mut self) -> Result<(), StorageError>;

    /// carry out a write requested by the core
    fn persist(&mut self, request: &PersistRequest) -> Result<(), StorageError> {
        match request {
            PersistRequest::State(state) => self.save(state),
            PersistRequest::StateAndSnapshot(state, snapshot) => {
                self.save_with_snapshot(state, snapshot)
            }
        }
    }
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn save(&mut self, state: &PersistentState) -> Result<(), StorageError> {
        (**self).save(state)
    }

    fn save_with_snapshot(
        &mut self,
        state: &PersistentState,
        snapshot: &Snapshot,
    ) -> Result<(), StorageError> {
        (**self).save_with_snapshot(state, snapshot)
    }

    fn load(&self) -> Result<Option<PersistentState>, StorageError> {
        (**self).load()
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>, StorageError> {
        (**self).load_snapshot()
    }

    fn state_size(&self) -> usize {
        (**self).state_size()
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        (**self).clear()
    }
}

/// reject a snapshot that does not sit exactly on the log's compaction boundary
pub(crate) fn check_anchor(state: &PersistentState, snapshot: &Snapshot) -> Result<(), StorageError> {
    let meta = &snapshot.meta;
    if meta.last_included_index != state.log.snapshot_index()
        || meta.last_included_term != state.log.snapshot_term()
    {
        return Err(StorageError::Corrupt(format!(
            "snapshot ({}, {}) does not match log boundary ({}, {})",
            meta.last_included_index,
            meta.last_included_term,
            state.log.snapshot_index(),
            state.log.snapshot_term()
        )));
    }
    Ok(())
}
