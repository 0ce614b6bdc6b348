use raft_core::RaftError;
use raft_storage::StorageError;
use thiserror::Error;

/// Errors surfaced by a running node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Raft(#[from] RaftError),

    /// A durable write failed; the node has stopped itself.
    #[error("raft storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid node config: {0}")]
    Config(String),

    #[error("raft node is shut down")]
    Shutdown,
}

impl NodeError {
    /// The leader this node believes in, when the error is a redirect.
    pub fn leader_hint(&self) -> Option<raft_core::PeerId> {
        match self {
            NodeError::Raft(RaftError::NotLeader { leader_hint }) => *leader_hint,
            _ => None,
        }
    }
}
