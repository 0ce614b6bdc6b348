use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode or decode raft state: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("persisted raft state is corrupt: {0}")]
    Corrupt(String),
}
