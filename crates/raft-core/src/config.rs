//! # config
//!
//! why: keep the timing knobs of a node in one validated place
//! relations: read by node.rs when arming timers, by replication.rs for batching
//! what: RaftConfig, randomized election timeout

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::RaftError;

/// Timing and batching parameters, in logical milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout
    pub election_timeout_min: u64,
    /// Upper bound (inclusive) of the randomized election timeout
    pub election_timeout_max: u64,
    /// Interval between leader heartbeats, must be below `election_timeout_min`
    pub heartbeat_interval: u64,
    /// Upper bound on entries carried by one AppendEntries
    pub max_entries_per_append: usize,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            max_entries_per_append: 64,
        }
    }
}

impl RaftConfig {
    pub fn with_election_timeout(mut self, min: u64, max: u64) -> Self {
        self.election_timeout_min = min;
        self.election_timeout_max = max;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: u64) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_max_entries_per_append(mut self, max: usize) -> Self {
        self.max_entries_per_append = max;
        self
    }

    /// check the relations the election logic depends on
    pub fn validate(&self) -> Result<(), RaftError> {
        if self.heartbeat_interval == 0 {
            return Err(RaftError::InvalidConfig(
                "heartbeat_interval must be positive".into(),
            ));
        }
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err(RaftError::InvalidConfig(format!(
                "heartbeat_interval ({}) must be shorter than election_timeout_min ({})",
                self.heartbeat_interval, self.election_timeout_min
            )));
        }
        if self.election_timeout_min > self.election_timeout_max {
            return Err(RaftError::InvalidConfig(format!(
                "election_timeout_min ({}) exceeds election_timeout_max ({})",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if self.max_entries_per_append == 0 {
            return Err(RaftError::InvalidConfig(
                "max_entries_per_append must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Draw a fresh election timeout, uniformly from the configured range.
    pub fn random_election_timeout(&self) -> u64 {
        rand::thread_rng().gen_range(self.election_timeout_min..=self.election_timeout_max)
    }
}
