//! # node
//!
//! why: one live consensus peer; the core runs under a single lock and every
//!      step is persisted before anything it produced leaves the process
//! relations: owns a raft_core::RaftNode and a Box<dyn Storage>; spawns
//!            ticker.rs and apply.rs; sends through a Transport
//! what: Raft handle, NodeStatus, inbound rpc entry points, outbound dispatch

use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt};
use raft_core::{
    AppendEntriesArgs, AppendEntriesReply, AppendRound, ApplyMsg, InstallSnapshotArgs,
    InstallSnapshotReply, NodeState, Outbound, PeerId, Proposal, RaftMessage, RaftNode,
    RequestVoteArgs, RequestVoteReply, SnapshotRound,
};
use raft_storage::Storage;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;

use crate::{apply, ticker, NodeConfig, NodeError, Transport, TransportError};

/// Point-in-time view of a node, for tests and operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub id: PeerId,
    pub role: NodeState,
    pub term: u64,
    pub leader_hint: Option<PeerId>,
    pub commit_index: u64,
    pub last_applied: u64,
    pub last_log_index: u64,
    pub snapshot_index: u64,
}

/// Handle to a running node. Cheap to clone; all clones drive the same peer.
#[derive(Clone)]
pub struct Raft {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) id: PeerId,
    pub(crate) config: NodeConfig,
    shared: Mutex<Shared>,
    transport: Arc<dyn Transport>,
    epoch: Instant,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) apply_ready: Notify,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    core: RaftNode,
    storage: Box<dyn Storage>,
    stopped: bool,
}

/// A reply paired with the token of the round that produced it.
enum Reply {
    Vote(u64, RequestVoteReply),
    Append(AppendRound, AppendEntriesReply),
    Snapshot(SnapshotRound, InstallSnapshotReply),
}

impl Raft {
    /// Start a peer from whatever `storage` holds (empty means a fresh node).
    ///
    /// Returns the handle and the ordered stream of committed commands and
    /// installed snapshots. Must be called inside a tokio runtime.
    pub fn spawn<S>(
        id: PeerId,
        peers: Vec<PeerId>,
        config: NodeConfig,
        storage: S,
        transport: Arc<dyn Transport>,
    ) -> Result<(Self, mpsc::Receiver<ApplyMsg>), NodeError>
    where
        S: Storage + 'static,
    {
        config.validate()?;
        let state = storage.load()?.unwrap_or_default();
        let snapshot = storage.load_snapshot()?;
        let core = RaftNode::restore(id, peers, config.raft.clone(), state, snapshot)?;

        let (apply_tx, apply_rx) = mpsc::channel(config.apply_buffer);
        let (shutdown, _) = watch::channel(false);
        let raft = Raft {
            inner: Arc::new(Inner {
                id,
                config,
                shared: Mutex::new(Shared { core, storage: Box::new(storage), stopped: false }),
                transport,
                epoch: Instant::now(),
                shutdown,
                apply_ready: Notify::new(),
                tasks: std::sync::Mutex::new(Vec::new()),
            }),
        };

        let ticker = tokio::spawn(ticker::run(raft.clone(), raft.inner.shutdown.subscribe()));
        let applier =
            tokio::spawn(apply::run(raft.clone(), apply_tx, raft.inner.shutdown.subscribe()));
        raft.tasks().extend([ticker, applier]);

        tracing::info!(id, "raft node started");
        Ok((raft, apply_rx))
    }

    pub fn id(&self) -> PeerId {
        self.inner.id
    }

    /// Propose a command. Returns where it will land if it commits; commitment
    /// itself is observed on the apply stream.
    pub async fn start(&self, command: Vec<u8>) -> Result<Proposal, NodeError> {
        Ok(self.with_core(|core| core.start(command)).await??)
    }

    /// (current term, whether this node believes it is leader)
    pub async fn get_state(&self) -> (u64, bool) {
        let shared = self.inner.shared.lock().await;
        let (term, is_leader) = shared.core.get_state();
        (term, is_leader && !shared.stopped)
    }

    pub async fn status(&self) -> NodeStatus {
        let shared = self.inner.shared.lock().await;
        let core = &shared.core;
        NodeStatus {
            id: core.id(),
            role: core.state(),
            term: core.current_term(),
            leader_hint: core.leader_hint(),
            commit_index: core.commit_index(),
            last_applied: core.last_applied(),
            last_log_index: core.last_log_index(),
            snapshot_index: core.log().snapshot_index(),
        }
    }

    /// Compact the log through `index` with a state machine image taken there.
    pub async fn snapshot(&self, index: u64, data: Vec<u8>) -> Result<(), NodeError> {
        Ok(self.with_core(|core| core.snapshot(index, data)).await??)
    }

    /// Bytes of persisted raft state, for deciding when to snapshot.
    pub async fn state_size(&self) -> usize {
        self.inner.shared.lock().await.storage.state_size()
    }

    // -- inbound rpcs --

    pub async fn request_vote(&self, args: RequestVoteArgs) -> Result<RequestVoteReply, NodeError> {
        self.with_core(|core| core.handle_request_vote(args)).await
    }

    pub async fn append_entries(
        &self,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesReply, NodeError> {
        self.with_core(|core| core.handle_append_entries(args)).await
    }

    pub async fn install_snapshot(
        &self,
        args: InstallSnapshotArgs,
    ) -> Result<InstallSnapshotReply, NodeError> {
        self.with_core(|core| core.handle_install_snapshot(args)).await
    }

    // -- lifecycle --

    /// Stop timers, the apply loop and in-flight rpcs. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        self.inner.shared.lock().await.stopped = true;
        self.inner.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks());
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(id = self.inner.id, error = %e, "raft task ended abnormally");
            }
        }
        tracing::info!(id = self.inner.id, "raft node stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    // -- internals --

    fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Milliseconds since this node started; the core's logical clock.
    pub(crate) fn now(&self) -> u64 {
        self.inner.epoch.elapsed().as_millis() as u64
    }

    /// Run one step of the core under the lock, persist what it asks for,
    /// then release the lock and ship its outbound messages.
    ///
    /// A failed write stops the node and nothing from the step is sent.
    pub(crate) async fn with_core<R>(
        &self,
        step: impl FnOnce(&mut RaftNode) -> R,
    ) -> Result<R, NodeError> {
        let mut shared = self.inner.shared.lock().await;
        if shared.stopped {
            return Err(NodeError::Shutdown);
        }
        let result = step(&mut shared.core);

        if let Some(request) = shared.core.take_persist() {
            if let Err(e) = shared.storage.persist(&request) {
                tracing::error!(id = self.inner.id, error = %e, "persisting raft state failed, stopping node");
                shared.stopped = true;
                shared.core.take_outbox();
                drop(shared);
                self.inner.shutdown.send_replace(true);
                return Err(e.into());
            }
        }

        let outbound = shared.core.take_outbox();
        let apply_ready = shared.core.has_pending_apply();
        drop(shared);

        for out in outbound {
            tokio::spawn(self.clone().deliver(out));
        }
        if apply_ready {
            self.inner.apply_ready.notify_one();
        }
        Ok(result)
    }

    /// Send one request and feed its reply back into the core.
    fn deliver(self, out: Outbound) -> BoxFuture<'static, ()> {
        async move {
            let mut shutdown = self.inner.shutdown.subscribe();
            if *shutdown.borrow() {
                return;
            }
            let to = out.to;
            let timeout = Duration::from_millis(self.inner.config.rpc_timeout_ms);

            let result = tokio::select! {
                result = tokio::time::timeout(timeout, self.call(to, out.message)) => {
                    result.unwrap_or(Err(TransportError::Timeout))
                }
                _ = shutdown.changed() => return,
            };

            let reply = match result {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::trace!(id = self.inner.id, peer = to, error = %e, "rpc lost");
                    return;
                }
            };
            let _ = self
                .with_core(|core| match reply {
                    Reply::Vote(sent_term, reply) => {
                        core.handle_request_vote_reply(to, sent_term, reply);
                    }
                    Reply::Append(round, reply) => {
                        core.handle_append_entries_reply(to, round, reply);
                    }
                    Reply::Snapshot(round, reply) => {
                        core.handle_install_snapshot_reply(to, round, reply);
                    }
                })
                .await;
        }
        .boxed()
    }

    async fn call(&self, to: PeerId, message: RaftMessage) -> Result<Reply, TransportError> {
        let transport = &self.inner.transport;
        match message {
            RaftMessage::RequestVote(args) => {
                let sent_term = args.term;
                let reply = transport.request_vote(to, args).await?;
                Ok(Reply::Vote(sent_term, reply))
            }
            RaftMessage::AppendEntries(args) => {
                let round = args.round();
                let reply = transport.append_entries(to, args).await?;
                Ok(Reply::Append(round, reply))
            }
            RaftMessage::InstallSnapshot(args) => {
                let round = args.round();
                let reply = transport.install_snapshot(to, args).await?;
                Ok(Reply::Snapshot(round, reply))
            }
        }
    }
}

impl std::fmt::Debug for Raft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raft").field("id", &self.inner.id).finish_non_exhaustive()
    }
}
