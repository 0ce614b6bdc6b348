//! # error
//!
//! why: surface the few raft outcomes a caller must act on
//! relations: returned by node.rs (start, restore), snapshot.rs, config.rs
//! what: RaftError

use thiserror::Error;

use crate::PeerId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RaftError {
    /// This node cannot accept commands; the caller should retry elsewhere.
    #[error("not the leader (leader hint: {leader_hint:?})")]
    NotLeader { leader_hint: Option<PeerId> },

    /// Compaction was requested past what has been applied.
    #[error("cannot snapshot through index {index}: only {applied} applied")]
    SnapshotOutOfRange { index: u64, applied: u64 },

    /// Persisted state failed validation on restore.
    #[error("corrupt persisted state: {0}")]
    CorruptState(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
