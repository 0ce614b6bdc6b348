//! # snapshot
//!
//! why: bound log growth and catch up followers whose entries were compacted
//! relations: extends node.rs; persisted with the log via PersistRequest::StateAndSnapshot
//! what: Snapshot types, consumer-driven compaction, InstallSnapshot handling

use serde::{Deserialize, Serialize};

use crate::{
    InstallSnapshotArgs, InstallSnapshotReply, NodeState, PeerId, RaftError, RaftNode,
    SnapshotRound,
};

/// Position in the log a snapshot covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub last_included_index: u64,
    pub last_included_term: u64,
}

/// Opaque state machine image plus the log position it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub data: Vec<u8>,
}

impl Snapshot {
    pub fn new(last_included_index: u64, last_included_term: u64, data: Vec<u8>) -> Self {
        Self {
            meta: SnapshotMeta { last_included_index, last_included_term },
            data,
        }
    }
}

impl RaftNode {
    /// Compact the log through `index` using a state machine image taken at
    /// that index. Requests at or below the current boundary are ignored.
    pub fn snapshot(&mut self, index: u64, data: Vec<u8>) -> Result<(), RaftError> {
        if index <= self.log.snapshot_index() {
            tracing::debug!(id = self.id, index, boundary = self.log.snapshot_index(), "ignoring stale snapshot request");
            return Ok(());
        }
        if index > self.last_applied {
            return Err(RaftError::SnapshotOutOfRange { index, applied: self.last_applied });
        }
        let term = self
            .log
            .term_at(index)
            .ok_or(RaftError::SnapshotOutOfRange { index, applied: self.last_applied })?;

        self.log.compact_to(index);
        self.snapshot = Some(Snapshot::new(index, term, data));
        self.mark_snapshot_dirty();
        tracing::info!(id = self.id, index, term, remaining = self.log.len(), "compacted log");
        Ok(())
    }

    /// Follower side of snapshot transfer.
    ///
    /// Installs only snapshots that reach past the commit index; anything at or
    /// below it is already reflected locally, which makes repeats no-ops.
    pub fn handle_install_snapshot(&mut self, args: InstallSnapshotArgs) -> InstallSnapshotReply {
        if args.term < self.current_term {
            return InstallSnapshotReply { term: self.current_term };
        }
        if args.term > self.current_term || self.state != NodeState::Follower {
            self.become_follower(args.term);
        }
        self.leader_id = Some(args.leader_id);
        self.reset_election_timer();

        let index = args.last_included_index;
        let term = args.last_included_term;
        if index <= self.commit_index {
            tracing::debug!(id = self.id, index, commit_index = self.commit_index, "ignoring stale snapshot");
            return InstallSnapshotReply { term: self.current_term };
        }

        if self.log.term_at(index) == Some(term) {
            // keep the suffix the snapshot does not cover
            self.log.compact_to(index);
        } else {
            self.log.reset(index, term);
        }

        let snapshot = Snapshot::new(index, term, args.data);
        self.commit_index = index;
        self.pending_snapshot = Some(snapshot.clone());
        self.snapshot = Some(snapshot);
        self.mark_snapshot_dirty();

        tracing::info!(id = self.id, index, term, leader = args.leader_id, "installed snapshot from leader");
        InstallSnapshotReply { term: self.current_term }
    }

    /// Leader side feedback for an InstallSnapshot round.
    pub fn handle_install_snapshot_reply(
        &mut self,
        from: PeerId,
        round: SnapshotRound,
        reply: InstallSnapshotReply,
    ) {
        if reply.term > self.current_term {
            self.become_follower(reply.term);
            return;
        }
        if self.state != NodeState::Leader || round.term != self.current_term {
            tracing::trace!(id = self.id, peer = from, round_term = round.term, "dropping stale snapshot reply");
            return;
        }
        let matched = self
            .match_index
            .get(&from)
            .copied()
            .unwrap_or(0)
            .max(round.last_included_index);
        self.match_index.insert(from, matched);
        let next = self.next_index.get(&from).copied().unwrap_or(1).max(matched + 1);
        self.next_index.insert(from, next);

        if next <= self.log.last_index() {
            if let Some(message) = self.create_append_entries(from) {
                self.send(from, message);
            }
        }
        self.advance_commit_index();
    }
}
