//! # apply
//!
//! why: hand committed work to the consuming state machine in log order
//! relations: batches drained by the raft-runtime apply loop
//! what: ApplyMsg, RaftNode::next_apply_batch

use serde::{Deserialize, Serialize};

use crate::RaftNode;

/// One unit of work for the consuming state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyMsg {
    /// A committed command.
    Command { index: u64, term: u64, command: Vec<u8> },
    /// Replace state machine state with a snapshot covering everything through `index`.
    Snapshot { index: u64, term: u64, data: Vec<u8> },
}

impl ApplyMsg {
    pub fn index(&self) -> u64 {
        match self {
            ApplyMsg::Command { index, .. } | ApplyMsg::Snapshot { index, .. } => *index,
        }
    }
}

impl RaftNode {
    /// Whether `next_apply_batch` would return anything.
    pub fn has_pending_apply(&self) -> bool {
        self.pending_snapshot.is_some() || self.last_applied < self.commit_index
    }

    /// Take up to `max` messages to deliver, advancing `last_applied`.
    ///
    /// A pending snapshot is always delivered first and on its own.
    /// Only the apply loop calls this, so it is the only writer of `last_applied`.
    pub fn next_apply_batch(&mut self, max: usize) -> Vec<ApplyMsg> {
        if let Some(snapshot) = self.pending_snapshot.take() {
            self.last_applied = self.last_applied.max(snapshot.meta.last_included_index);
            return vec![ApplyMsg::Snapshot {
                index: snapshot.meta.last_included_index,
                term: snapshot.meta.last_included_term,
                data: snapshot.data,
            }];
        }

        let mut batch = Vec::new();
        while self.last_applied < self.commit_index && batch.len() < max {
            let index = self.last_applied + 1;
            let Some(entry) = self.log.get(index) else {
                tracing::warn!(id = self.id, index, "committed entry missing from log");
                break;
            };
            batch.push(ApplyMsg::Command {
                index,
                term: entry.term,
                command: entry.command.clone(),
            });
            self.last_applied = index;
        }
        batch
    }
}
