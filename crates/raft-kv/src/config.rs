//! # config
//!
//! why: kv service knobs layered over the node config
//! relations: consumed by server.rs and clerk.rs; embeds raft_runtime::NodeConfig
//! what: KvConfig with serde defaults, json loading and validation

use raft_runtime::NodeConfig;
use serde::{Deserialize, Serialize};

use crate::KvError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvConfig {
    pub node: NodeConfig,
    /// Snapshot once persisted raft state reaches this many bytes; None never snapshots
    pub max_raft_state: Option<usize>,
    /// How long a server waits for its entry to apply (ms)
    pub request_timeout_ms: u64,
    /// Clerk pause after trying every server without success (ms)
    pub retry_interval_ms: u64,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            max_raft_state: None,
            request_timeout_ms: 500,
            retry_interval_ms: 20,
        }
    }
}

impl KvConfig {
    pub fn from_json(json: &str) -> Result<Self, KvError> {
        let config: Self = serde_json::from_str(json).map_err(|e| KvError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_raft_state(mut self, bytes: usize) -> Self {
        self.max_raft_state = Some(bytes);
        self
    }

    pub fn validate(&self) -> Result<(), KvError> {
        self.node.validate().map_err(|e| KvError::Config(e.to_string()))?;
        if self.max_raft_state == Some(0) {
            return Err(KvError::Config("max_raft_state must be positive".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(KvError::Config("request_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}
