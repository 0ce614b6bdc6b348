//! # message
//!
//! why: define all raft rpc message types for node communication
//! relations: produced and consumed by node.rs, carried by raft-runtime transports
//! what: RequestVote, AppendEntries, InstallSnapshot args/replies, outbound envelope

use serde::{Deserialize, Serialize};

use crate::{LogEntry, PeerId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    pub term: u64,
    pub candidate_id: PeerId,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub term: u64,
    pub vote_granted: bool,
}

/// Replicate log entries (also serves as heartbeat when entries is empty)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    pub term: u64,
    pub leader_id: PeerId,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

impl AppendEntriesArgs {
    /// What the leader needs to remember about this request to judge its reply.
    pub fn round(&self) -> AppendRound {
        AppendRound {
            term: self.term,
            prev_log_index: self.prev_log_index,
            entries: self.entries.len() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub term: u64,
    pub success: bool,
    /// On rejection: where the leader should resume probing.
    pub conflict_index: u64,
    /// On rejection: the term of the follower's conflicting entry, if it has one.
    pub conflict_term: Option<u64>,
}

impl AppendEntriesReply {
    pub(crate) fn accepted(term: u64) -> Self {
        Self { term, success: true, conflict_index: 0, conflict_term: None }
    }

    pub(crate) fn rejected(term: u64, conflict_index: u64, conflict_term: Option<u64>) -> Self {
        Self { term, success: false, conflict_index, conflict_term }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshotArgs {
    pub term: u64,
    pub leader_id: PeerId,
    pub last_included_index: u64,
    pub last_included_term: u64,
    pub data: Vec<u8>,
}

impl InstallSnapshotArgs {
    pub fn round(&self) -> SnapshotRound {
        SnapshotRound { term: self.term, last_included_index: self.last_included_index }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshotReply {
    pub term: u64,
}

/// Token captured when an AppendEntries is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendRound {
    pub term: u64,
    pub prev_log_index: u64,
    pub entries: u64,
}

impl AppendRound {
    /// Highest index this round would have replicated.
    pub fn last_index(&self) -> u64 {
        self.prev_log_index + self.entries
    }
}

/// Token captured when an InstallSnapshot is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotRound {
    pub term: u64,
    pub last_included_index: u64,
}

/// All requests a node sends to its peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    RequestVote(RequestVoteArgs),
    AppendEntries(AppendEntriesArgs),
    InstallSnapshot(InstallSnapshotArgs),
}

impl RaftMessage {
    pub fn term(&self) -> u64 {
        match self {
            RaftMessage::RequestVote(args) => args.term,
            RaftMessage::AppendEntries(args) => args.term,
            RaftMessage::InstallSnapshot(args) => args.term,
        }
    }
}

/// A request queued for delivery to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: PeerId,
    pub message: RaftMessage,
}
