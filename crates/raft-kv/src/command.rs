//! # command
//!
//! why: what a client asks for, in the form it takes inside the raft log
//! relations: encoded by server.rs, decoded and executed by state_machine.rs
//! what: ClientId, Op, Command, Reply

use serde::{Deserialize, Serialize};

use crate::KvError;

pub type ClientId = u64;

/// What a request returns: the value for a Get, an empty string for writes.
pub type Reply = Result<String, KvError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Get { key: String },
    Put { key: String, value: String },
    Append { key: String, value: String },
}

impl Op {
    pub fn key(&self) -> &str {
        match self {
            Op::Get { key } | Op::Put { key, .. } | Op::Append { key, .. } => key,
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Op::Get { .. })
    }
}

/// One client request. `(client_id, request_id)` identifies it across retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub client_id: ClientId,
    pub request_id: u64,
    pub op: Op,
}

impl Command {
    pub fn encode(&self) -> Result<Vec<u8>, KvError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, KvError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
