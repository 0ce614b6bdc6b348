//! # config
//!
//! why: runtime knobs that sit outside the consensus algorithm itself
//! relations: wraps raft_core::RaftConfig; read by node.rs, ticker.rs and apply.rs
//! what: NodeConfig with serde defaults, json loading and validation

use raft_core::RaftConfig;
use serde::{Deserialize, Serialize};

use crate::NodeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub raft: RaftConfig,
    /// How often the scheduler loop advances the core clock (ms)
    pub tick_interval_ms: u64,
    /// Upper bound on a single outbound rpc (ms)
    pub rpc_timeout_ms: u64,
    /// Capacity of the apply channel, also the largest apply batch
    pub apply_buffer: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            raft: RaftConfig::default(),
            tick_interval_ms: 10,
            rpc_timeout_ms: 100,
            apply_buffer: 256,
        }
    }
}

impl NodeConfig {
    /// Parse a config from json; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, NodeError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| NodeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_raft(mut self, raft: RaftConfig) -> Self {
        self.raft = raft;
        self
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        self.raft.validate()?;
        if self.tick_interval_ms == 0 || self.tick_interval_ms >= self.raft.heartbeat_interval {
            return Err(NodeError::Config(format!(
                "tick_interval_ms ({}) must be positive and below heartbeat_interval ({})",
                self.tick_interval_ms, self.raft.heartbeat_interval
            )));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(NodeError::Config("rpc_timeout_ms must be positive".into()));
        }
        if self.apply_buffer == 0 {
            return Err(NodeError::Config("apply_buffer must be positive".into()));
        }
        Ok(())
    }
}
