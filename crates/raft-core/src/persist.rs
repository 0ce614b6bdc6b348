//! # persist
//!
//! why: name exactly what must reach stable storage before a node acts
//! relations: produced by node.rs, written by raft-storage implementations
//! what: PersistentState, PersistRequest

use serde::{Deserialize, Serialize};

use crate::{PeerId, RaftLog, Snapshot};

/// The durable triple {currentTerm, votedFor, log}.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    pub current_term: u64,
    pub voted_for: Option<PeerId>,
    pub log: RaftLog,
}

/// A pending durable write. The host must complete it before sending any
/// reply or outbound message produced in the same step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistRequest {
    State(PersistentState),
    StateAndSnapshot(PersistentState, Snapshot),
}

impl PersistRequest {
    pub fn state(&self) -> &PersistentState {
        match self {
            PersistRequest::State(state) | PersistRequest::StateAndSnapshot(state, _) => state,
        }
    }
}
