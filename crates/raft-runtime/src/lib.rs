//! # raft-runtime
//!
//! why: run the sans-io raft core as a live peer on tokio
//! relations: drives raft-core, persists through raft-storage, consumed by raft-kv
//! what: Raft handle, scheduler and apply loops, Transport trait, in-process LocalNetwork

mod apply;
mod config;
mod error;
mod network;
mod node;
mod ticker;
mod transport;

pub use config::NodeConfig;
pub use error::NodeError;
pub use network::{LocalNetwork, LocalTransport};
pub use node::{NodeStatus, Raft};
pub use transport::{Transport, TransportError};

pub use raft_core::{ApplyMsg, NodeState, PeerId, Proposal, RaftConfig};
