//! # raft-core
//!
//! why: implement the core raft consensus algorithm in pure, portable rust
//! relations: driven by raft-runtime, persisted via raft-storage, consumed by raft-kv
//! what: log, rpc messages, election, replication, commit/apply, snapshots
//!
//! The node never performs IO. Every operation queues its effects (outbound
//! rpcs, a persistence request, apply work) for the host to drain.

pub mod apply;
pub mod config;
pub mod election;
pub mod error;
pub mod log;
pub mod message;
pub mod node;
pub mod persist;
pub mod replication;
pub mod snapshot;

/// Identity of a peer: a fixed id from the statically-known cluster list.
pub type PeerId = u64;

pub use apply::ApplyMsg;
pub use config::RaftConfig;
pub use error::RaftError;
pub use log::{LogEntry, RaftLog};
pub use message::{
    AppendEntriesArgs, AppendEntriesReply, AppendRound, InstallSnapshotArgs, InstallSnapshotReply,
    Outbound, RaftMessage, RequestVoteArgs, RequestVoteReply, SnapshotRound,
};
pub use node::{NodeState, Proposal, RaftNode};
pub use persist::{PersistRequest, PersistentState};
pub use snapshot::{Snapshot, SnapshotMeta};
