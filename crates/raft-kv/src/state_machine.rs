//! # state machine
//!
//! why: the replicated map every server converges on, applying each client
//!      write at most once
//! relations: fed decoded commands by server.rs in log order; its json image
//!            is the raft snapshot payload
//! what: KvStateMachine, per-client sessions

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{ClientId, Command, KvError, Op, Reply};

/// Last write seen from one client and what it returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Session {
    last_request_id: u64,
    reply: Reply,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KvStateMachine {
    data: BTreeMap<String, String>,
    sessions: HashMap<ClientId, Session>,
    last_applied: u64,
}

impl KvStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute the command committed at `index`.
    ///
    /// A write whose request id is not newer than the client's last one has
    /// already been executed; its cached reply is returned instead.
    pub fn apply(&mut self, index: u64, command: &Command) -> Reply {
        self.last_applied = self.last_applied.max(index);

        if let Op::Get { key } = &command.op {
            return self.get(key);
        }
        if let Some(session) = self.sessions.get(&command.client_id) {
            if command.request_id <= session.last_request_id {
                tracing::debug!(
                    client = command.client_id,
                    request = command.request_id,
                    "duplicate write suppressed"
                );
                return session.reply.clone();
            }
        }

        match &command.op {
            Op::Put { key, value } => {
                self.data.insert(key.clone(), value.clone());
            }
            Op::Append { key, value } => {
                self.data.entry(key.clone()).or_default().push_str(value);
            }
            Op::Get { .. } => {}
        }
        let reply: Reply = Ok(String::new());
        self.sessions.insert(
            command.client_id,
            Session { last_request_id: command.request_id, reply: reply.clone() },
        );
        reply
    }

    /// Advance past an entry that carried no usable command.
    pub fn skip(&mut self, index: u64) {
        self.last_applied = self.last_applied.max(index);
    }

    pub fn get(&self, key: &str) -> Reply {
        self.data.get(key).cloned().ok_or(KvError::NoKey)
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn snapshot(&self) -> Result<Vec<u8>, KvError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn restore(data: &[u8]) -> Result<Self, KvError> {
        Ok(serde_json::from_slice(data)?)
    }
}
