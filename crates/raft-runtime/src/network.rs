//! # network
//!
//! why: run whole clusters inside one process with controllable faults
//! relations: LocalTransport implements transport.rs by calling the target
//!            Raft's inbound methods directly
//! what: LocalNetwork (connectivity, loss, delay, rpc counting), LocalTransport

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use raft_core::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply, PeerId,
    RequestVoteArgs, RequestVoteReply,
};

use crate::{NodeError, Raft, Transport, TransportError};

/// Chance that an unreliable network drops a request or a reply.
const DROP_PROBABILITY: f64 = 0.1;
/// Upper bound on the extra latency of an unreliable network (ms).
const MAX_DELAY_MS: u64 = 27;

#[derive(Default)]
struct NetState {
    nodes: HashMap<PeerId, Raft>,
    connected: HashSet<PeerId>,
    unreliable: bool,
}

/// In-process router between registered nodes.
///
/// A node that is disconnected can neither send nor receive. Replies are
/// dropped too when either side disconnects while the call is in flight.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    state: Arc<Mutex<NetState>>,
    rpcs: Arc<AtomicU64>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `raft` reachable as `id` and connect it.
    pub fn register(&self, id: PeerId, raft: Raft) {
        let mut state = self.state();
        state.nodes.insert(id, raft);
        state.connected.insert(id);
    }

    /// Forget a node entirely, as when its process dies.
    pub fn remove(&self, id: PeerId) -> Option<Raft> {
        let mut state = self.state();
        state.connected.remove(&id);
        state.nodes.remove(&id)
    }

    pub fn connect(&self, id: PeerId) {
        self.state().connected.insert(id);
    }

    pub fn disconnect(&self, id: PeerId) {
        self.state().connected.remove(&id);
    }

    pub fn is_connected(&self, id: PeerId) -> bool {
        self.state().connected.contains(&id)
    }

    /// An unreliable network delays every rpc a little and drops some.
    pub fn set_reliable(&self, reliable: bool) {
        self.state().unreliable = !reliable;
    }

    /// Requests attempted since the network was created.
    pub fn rpc_count(&self) -> u64 {
        self.rpcs.load(Ordering::Relaxed)
    }

    /// The transport node `from` sends through.
    pub fn transport(&self, from: PeerId) -> Arc<dyn Transport> {
        Arc::new(LocalTransport { from, net: self.clone() })
    }

    fn state(&self) -> MutexGuard<'_, NetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide the fate of one leg of an rpc: Some(delay) if it goes through.
    fn roll(&self, from: PeerId, to: PeerId) -> Result<Option<Duration>, TransportError> {
        let state = self.state();
        if !state.connected.contains(&from) || !state.connected.contains(&to) {
            return Err(TransportError::Unreachable(to));
        }
        if !state.unreliable {
            return Ok(None);
        }
        let mut rng = rand::thread_rng();
        if rng.gen_bool(DROP_PROBABILITY) {
            return Err(TransportError::Unreachable(to));
        }
        Ok(Some(Duration::from_millis(rng.gen_range(0..=MAX_DELAY_MS))))
    }

    async fn leg(&self, from: PeerId, to: PeerId) -> Result<(), TransportError> {
        if let Some(delay) = self.roll(from, to)? {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn route(&self, from: PeerId, to: PeerId) -> Result<Raft, TransportError> {
        self.rpcs.fetch_add(1, Ordering::Relaxed);
        self.leg(from, to).await?;
        let raft = self.state().nodes.get(&to).cloned();
        raft.ok_or(TransportError::Unreachable(to))
    }
}

fn inbound_error(to: PeerId, error: NodeError) -> TransportError {
    match error {
        NodeError::Shutdown => TransportError::Shutdown,
        _ => TransportError::Unreachable(to),
    }
}

/// One node's view of a LocalNetwork.
pub struct LocalTransport {
    from: PeerId,
    net: LocalNetwork,
}

#[async_trait]
impl Transport for LocalTransport {
    async fn request_vote(
        &self,
        target: PeerId,
        args: RequestVoteArgs,
    ) -> Result<RequestVoteReply, TransportError> {
        let raft = self.net.route(self.from, target).await?;
        let reply = raft.request_vote(args).await.map_err(|e| inbound_error(target, e))?;
        self.net.leg(target, self.from).await?;
        Ok(reply)
    }

    async fn append_entries(
        &self,
        target: PeerId,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesReply, TransportError> {
        let raft = self.net.route(self.from, target).await?;
        let reply = raft.append_entries(args).await.map_err(|e| inbound_error(target, e))?;
        self.net.leg(target, self.from).await?;
        Ok(reply)
    }

    async fn install_snapshot(
        &self,
        target: PeerId,
        args: InstallSnapshotArgs,
    ) -> Result<InstallSnapshotReply, TransportError> {
        let raft = self.net.route(self.from, target).await?;
        let reply = raft.install_snapshot(args).await.map_err(|e| inbound_error(target, e))?;
        self.net.leg(target, self.from).await?;
        Ok(reply)
    }
}
