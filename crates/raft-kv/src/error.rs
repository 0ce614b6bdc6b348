use raft_core::{PeerId, RaftError};
use raft_runtime::NodeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of a kv request that did not produce a value.
///
/// Cloneable and serializable because replies are cached per client and
/// travel inside snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum KvError {
    #[error("no such key")]
    NoKey,

    /// The server cannot commit this request; try another one.
    #[error("wrong leader (leader hint: {leader_hint:?})")]
    WrongLeader { leader_hint: Option<PeerId> },

    #[error("request timed out")]
    Timeout,

    #[error("kv server is shut down")]
    Shutdown,

    #[error("malformed command: {0}")]
    Encoding(String),

    #[error("invalid kv config: {0}")]
    Config(String),

    #[error("raft failure: {0}")]
    Raft(String),
}

impl KvError {
    /// Whether a clerk should try the request again on another server.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KvError::WrongLeader { .. } | KvError::Timeout | KvError::Shutdown)
    }
}

impl From<NodeError> for KvError {
    fn from(e: NodeError) -> Self {
        match e {
            NodeError::Raft(RaftError::NotLeader { leader_hint }) => KvError::WrongLeader { leader_hint },
            NodeError::Shutdown => KvError::Shutdown,
            NodeError::Config(msg) => KvError::Config(msg),
            other => KvError::Raft(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for KvError {
    fn from(e: serde_json::Error) -> Self {
        KvError::Encoding(e.to_string())
    }
}
