//! # transport
//!
//! why: typed peer-to-peer rpc, one method per message kind
//! relations: implemented by network.rs for tests; called by node.rs per outbound message
//! what: Transport trait, TransportError

use async_trait::async_trait;
use raft_core::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply, PeerId,
    RequestVoteArgs, RequestVoteReply,
};
use thiserror::Error;

/// Transport abstraction for Raft RPC communication
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request_vote(
        &self,
        target: PeerId,
        args: RequestVoteArgs,
    ) -> Result<RequestVoteReply, TransportError>;

    async fn append_entries(
        &self,
        target: PeerId,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesReply, TransportError>;

    async fn install_snapshot(
        &self,
        target: PeerId,
        args: InstallSnapshotArgs,
    ) -> Result<InstallSnapshotReply, TransportError>;
}

/// A lost rpc. Raft treats every variant the same way: retry next round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("peer {0} is unreachable")]
    Unreachable(PeerId),

    #[error("rpc timed out")]
    Timeout,

    #[error("peer is shut down")]
    Shutdown,
}
