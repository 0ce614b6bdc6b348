//! # node
//!
//! why: define the raft node state machine and state transitions
//! relations: uses message.rs for rpc types, log.rs for entry management;
//!            election.rs, replication.rs, snapshot.rs and apply.rs extend it
//! what: NodeState enum, RaftNode struct, deadline timers, client contract

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::{
    Outbound, PeerId, PersistRequest, PersistentState, RaftConfig, RaftError, RaftLog,
    RaftMessage, Snapshot,
};

/// The three possible states a Raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Passive state - listens for heartbeats, votes when asked
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - manages log replication, sends heartbeats
    Leader,
}

impl Default for NodeState {
    fn default() -> Self {
        Self::Follower
    }
}

/// Where an accepted command landed in the leader's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub index: u64,
    pub term: u64,
}

/// A single Raft node in the cluster
#[derive(Debug)]
pub struct RaftNode {
    pub(crate) id: PeerId,
    pub(crate) cluster_nodes: Vec<PeerId>,
    pub(crate) config: RaftConfig,

    pub(crate) state: NodeState,
    pub(crate) current_term: u64,
    pub(crate) voted_for: Option<PeerId>,
    pub(crate) log: RaftLog,

    pub(crate) commit_index: u64,
    pub(crate) last_applied: u64,
    pub(crate) leader_id: Option<PeerId>,

    pub(crate) votes_received: BTreeSet<PeerId>,
    pub(crate) next_index: HashMap<PeerId, u64>,
    pub(crate) match_index: HashMap<PeerId, u64>,

    /// Latest snapshot, kept to ship to lagging followers
    pub(crate) snapshot: Option<Snapshot>,
    /// Snapshot waiting to be handed to the state machine
    pub(crate) pending_snapshot: Option<Snapshot>,

    /// Logical clock, advanced by `tick`
    pub(crate) now: u64,
    pub(crate) election_deadline: Option<u64>,
    pub(crate) heartbeat_deadline: Option<u64>,

    outbox: Vec<Outbound>,
    persist_state: bool,
    persist_snapshot: bool,
}

impl RaftNode {
    /// Create a new Raft node in Follower state
    pub fn new(id: PeerId, cluster_nodes: Vec<PeerId>) -> Self {
        Self::with_config(id, cluster_nodes, RaftConfig::default())
    }

    pub fn with_config(id: PeerId, cluster_nodes: Vec<PeerId>, config: RaftConfig) -> Self {
        let mut node = Self {
            id,
            cluster_nodes,
            config,
            state: NodeState::Follower,
            current_term: 0,
            voted_for: None,
            log: RaftLog::new(),
            commit_index: 0,
            last_applied: 0,
            leader_id: None,
            votes_received: BTreeSet::new(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            snapshot: None,
            pending_snapshot: None,
            now: 0,
            election_deadline: None,
            heartbeat_deadline: None,
            outbox: Vec::new(),
            persist_state: false,
            persist_snapshot: false,
        };
        node.reset_election_timer();
        node
    }

    /// Rebuild a node after a restart from its persisted state and snapshot.
    ///
    /// The snapshot (if any) is queued as the first apply message.
    pub fn restore(
        id: PeerId,
        cluster_nodes: Vec<PeerId>,
        config: RaftConfig,
        state: PersistentState,
        snapshot: Option<Snapshot>,
    ) -> Result<Self, RaftError> {
        config.validate()?;
        state.log.check().map_err(RaftError::CorruptState)?;

        let boundary = state.log.snapshot_index();
        match &snapshot {
            None if boundary > 0 => {
                return Err(RaftError::CorruptState(format!(
                    "log compacted through {boundary} but no snapshot was found"
                )));
            }
            Some(snap)
                if snap.meta.last_included_index != boundary
                    || snap.meta.last_included_term != state.log.snapshot_term() =>
            {
                return Err(RaftError::CorruptState(format!(
                    "snapshot ({}, {}) does not match log boundary ({}, {})",
                    snap.meta.last_included_index,
                    snap.meta.last_included_term,
                    boundary,
                    state.log.snapshot_term()
                )));
            }
            _ => {}
        }

        let mut node = Self::with_config(id, cluster_nodes, config);
        node.current_term = state.current_term;
        node.voted_for = state.voted_for;
        node.log = state.log;
        node.commit_index = boundary;
        node.last_applied = boundary;
        if boundary > 0 {
            node.pending_snapshot = snapshot.clone();
        }
        node.snapshot = snapshot;

        tracing::info!(
            id,
            term = node.current_term,
            last_log_index = node.log.last_index(),
            snapshot_index = boundary,
            "restored from persisted state"
        );
        Ok(node)
    }

    // -- accessors --

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<PeerId> {
        self.voted_for
    }

    pub fn log(&self) -> &RaftLog {
        &self.log
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn cluster_nodes(&self) -> &[PeerId] {
        &self.cluster_nodes
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    pub fn votes_received(&self) -> &BTreeSet<PeerId> {
        &self.votes_received
    }

    pub fn next_index(&self, peer: PeerId) -> Option<u64> {
        self.next_index.get(&peer).copied()
    }

    pub fn match_index(&self, peer: PeerId) -> Option<u64> {
        self.match_index.get(&peer).copied()
    }

    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn election_deadline(&self) -> Option<u64> {
        self.election_deadline
    }

    pub fn heartbeat_deadline(&self) -> Option<u64> {
        self.heartbeat_deadline
    }

    pub fn is_leader(&self) -> bool {
        self.state == NodeState::Leader
    }

    /// The node believed to be leader for the current term.
    pub fn leader_hint(&self) -> Option<PeerId> {
        self.leader_id
    }

    /// (current term, whether this node believes it is leader)
    pub fn get_state(&self) -> (u64, bool) {
        (self.current_term, self.is_leader())
    }

    pub fn last_log_index(&self) -> u64 {
        self.log.last_index()
    }

    pub fn last_log_term(&self) -> u64 {
        self.log.last_term()
    }

    /// Strict majority of the whole cluster, self included.
    pub fn quorum_size(&self) -> usize {
        self.cluster_nodes.len() / 2 + 1
    }

    pub fn has_quorum(&self) -> bool {
        self.votes_received.len() >= self.quorum_size()
    }

    pub(crate) fn peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        let id = self.id;
        self.cluster_nodes.iter().copied().filter(move |&p| p != id)
    }

    // -- host interface --

    /// Advance the logical clock and fire whichever deadline has passed.
    pub fn tick(&mut self, now: u64) {
        self.now = self.now.max(now);
        match self.state {
            NodeState::Leader => {
                if self.heartbeat_deadline.map_or(true, |d| self.now >= d) {
                    self.broadcast_append_entries();
                }
            }
            NodeState::Follower | NodeState::Candidate => {
                if self.election_deadline.map_or(false, |d| self.now >= d) {
                    tracing::debug!(id = self.id, term = self.current_term, "election timeout");
                    self.start_election();
                }
            }
        }
    }

    /// Submit a command. Non-blocking: the entry is only appended locally and
    /// queued for replication; commitment is observed through the apply stream.
    pub fn start(&mut self, command: Vec<u8>) -> Result<Proposal, RaftError> {
        if !self.is_leader() {
            return Err(RaftError::NotLeader { leader_hint: self.leader_id });
        }
        let term = self.current_term;
        let index = self.log.append(term, command);
        self.mark_dirty();
        tracing::debug!(id = self.id, term, index, "appended client command");

        if self.cluster_nodes.len() <= 1 {
            self.advance_commit_index();
        } else {
            self.broadcast_append_entries();
        }
        Ok(Proposal { index, term })
    }

    /// Drain the requests queued for peers.
    pub fn take_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Drain the pending durable write, if any.
    pub fn take_persist(&mut self) -> Option<PersistRequest> {
        let with_snapshot = std::mem::take(&mut self.persist_snapshot);
        let dirty = std::mem::take(&mut self.persist_state);
        if with_snapshot {
            if let Some(snapshot) = &self.snapshot {
                return Some(PersistRequest::StateAndSnapshot(
                    self.persistent_state(),
                    snapshot.clone(),
                ));
            }
        }
        if dirty || with_snapshot {
            return Some(PersistRequest::State(self.persistent_state()));
        }
        None
    }

    pub fn persistent_state(&self) -> PersistentState {
        PersistentState {
            current_term: self.current_term,
            voted_for: self.voted_for,
            log: self.log.clone(),
        }
    }

    // -- internal transitions --

    pub(crate) fn mark_dirty(&mut self) {
        self.persist_state = true;
    }

    pub(crate) fn mark_snapshot_dirty(&mut self) {
        self.persist_state = true;
        self.persist_snapshot = true;
    }

    pub(crate) fn send(&mut self, to: PeerId, message: RaftMessage) {
        self.outbox.push(Outbound { to, message });
    }

    pub(crate) fn reset_election_timer(&mut self) {
        self.election_deadline = Some(self.now + self.config.random_election_timeout());
    }

    /// Adopt `term` if it is newer and fall back to follower.
    ///
    /// Leader-only state is cleared and the election timer re-armed when it
    /// was not running.
    pub fn become_follower(&mut self, term: u64) {
        if term > self.current_term {
            tracing::debug!(id = self.id, from = self.current_term, to = term, "adopting newer term");
            self.current_term = term;
            self.voted_for = None;
            self.leader_id = None;
            self.mark_dirty();
        }
        if self.state != NodeState::Follower {
            tracing::info!(id = self.id, term = self.current_term, from = ?self.state, "stepping down to follower");
            self.state = NodeState::Follower;
        }
        self.votes_received.clear();
        self.next_index.clear();
        self.match_index.clear();
        self.heartbeat_deadline = None;
        if self.election_deadline.is_none() {
            self.reset_election_timer();
        }
    }
}
