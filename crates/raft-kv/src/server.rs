//! # server
//!
//! why: turn client requests into log entries and answer them once they apply
//! relations: owns a raft_runtime::Raft and its apply stream; executes through
//!            state_machine.rs; called by clerk.rs
//! what: KvServer, waiter table, applier task with size-triggered compaction

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use raft_runtime::{ApplyMsg, PeerId, Raft};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::{Command, KvConfig, KvError, KvStateMachine, Reply};

/// A request parked until the entry at its index applies.
struct Waiter {
    term: u64,
    tx: oneshot::Sender<Reply>,
}

struct State {
    machine: KvStateMachine,
    waiters: HashMap<u64, Waiter>,
}

struct Inner {
    raft: Raft,
    max_raft_state: Option<usize>,
    request_timeout: Duration,
    state: Mutex<State>,
    applier: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// One replica of the key/value service. Cheap to clone.
#[derive(Clone)]
pub struct KvServer {
    inner: Arc<Inner>,
}

impl KvServer {
    /// Serve on top of a running node, consuming its apply stream.
    pub fn new(raft: Raft, apply_rx: mpsc::Receiver<ApplyMsg>, config: &KvConfig) -> Self {
        let inner = Arc::new(Inner {
            raft,
            max_raft_state: config.max_raft_state,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            state: Mutex::new(State { machine: KvStateMachine::new(), waiters: HashMap::new() }),
            applier: std::sync::Mutex::new(None),
        });
        let applier = tokio::spawn(run_applier(inner.clone(), apply_rx));
        *inner.applier.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(applier);
        Self { inner }
    }

    pub fn id(&self) -> PeerId {
        self.inner.raft.id()
    }

    pub fn raft(&self) -> &Raft {
        &self.inner.raft
    }

    /// Replicate `command` and return its result once this server applies it.
    pub async fn execute(&self, command: Command) -> Reply {
        let bytes = command.encode()?;

        // hold the state lock across start so the entry cannot apply before
        // its waiter is registered
        let (index, rx) = {
            let mut state = self.inner.state.lock().await;
            let proposal = self.inner.raft.start(bytes).await?;
            let (tx, rx) = oneshot::channel();
            let waiter = Waiter { term: proposal.term, tx };
            if let Some(stale) = state.waiters.insert(proposal.index, waiter) {
                let _ = stale.tx.send(Err(KvError::WrongLeader { leader_hint: None }));
            }
            tracing::trace!(
                id = self.id(),
                index = proposal.index,
                term = proposal.term,
                client = command.client_id,
                request = command.request_id,
                "request proposed"
            );
            (proposal.index, rx)
        };

        match tokio::time::timeout(self.inner.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) if self.inner.raft.is_shutdown() => Err(KvError::Shutdown),
            Ok(Err(_)) => Err(KvError::WrongLeader { leader_hint: None }),
            Err(_) => {
                self.inner.state.lock().await.waiters.remove(&index);
                Err(KvError::Timeout)
            }
        }
    }

    /// Read straight from the local state machine, bypassing the log. May be stale.
    pub async fn local_get(&self, key: &str) -> Reply {
        self.inner.state.lock().await.machine.get(key)
    }

    pub async fn last_applied(&self) -> u64 {
        self.inner.state.lock().await.machine.last_applied()
    }

    pub async fn shutdown(&self) {
        self.inner.raft.shutdown().await;
        let applier =
            self.inner.applier.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take();
        if let Some(applier) = applier {
            if let Err(e) = applier.await {
                tracing::warn!(id = self.id(), error = %e, "kv applier ended abnormally");
            }
        }
    }
}

impl std::fmt::Debug for KvServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvServer").field("id", &self.id()).finish_non_exhaustive()
    }
}

async fn run_applier(inner: Arc<Inner>, mut apply_rx: mpsc::Receiver<ApplyMsg>) {
    let id = inner.raft.id();
    while let Some(msg) = apply_rx.recv().await {
        let mut state = inner.state.lock().await;
        match msg {
            ApplyMsg::Command { index, term, command } => {
                if index <= state.machine.last_applied() {
                    continue;
                }
                let reply = match Command::decode(&command) {
                    Ok(command) => state.machine.apply(index, &command),
                    Err(e) => {
                        tracing::warn!(id, index, error = %e, "skipping undecodable entry");
                        state.machine.skip(index);
                        Err(e)
                    }
                };

                if let Some(waiter) = state.waiters.remove(&index) {
                    // another leader's entry took this slot
                    let reply = if waiter.term == term {
                        reply
                    } else {
                        Err(KvError::WrongLeader { leader_hint: None })
                    };
                    let _ = waiter.tx.send(reply);
                }

                if let Some(max) = inner.max_raft_state {
                    if inner.raft.state_size().await >= max {
                        compact(&inner, &state.machine, index).await;
                    }
                }
            }
            ApplyMsg::Snapshot { index, data, .. } => {
                if index <= state.machine.last_applied() {
                    continue;
                }
                match KvStateMachine::restore(&data) {
                    Ok(machine) => {
                        state.machine = machine;
                        state.machine.skip(index);
                        tracing::info!(id, index, "restored state machine from snapshot");
                    }
                    Err(e) => {
                        tracing::error!(id, index, error = %e, "undecodable snapshot, stopping");
                        break;
                    }
                }
                // whatever those requests did is folded into the snapshot; let them retry
                state.waiters.retain(|&waiting, _| waiting > index);
            }
        }
    }
    // dropping the senders wakes every remaining request
    inner.state.lock().await.waiters.clear();
    tracing::debug!(id, "kv applier exited");
}

async fn compact(inner: &Inner, machine: &KvStateMachine, index: u64) {
    let data = match machine.snapshot() {
        Ok(data) => data,
        Err(e) => {
            tracing::error!(id = inner.raft.id(), index, error = %e, "encoding snapshot failed");
            return;
        }
    };
    match inner.raft.snapshot(index, data).await {
        Ok(()) => tracing::debug!(id = inner.raft.id(), index, "compacted raft log"),
        Err(e) => tracing::warn!(id = inner.raft.id(), index, error = %e, "compaction failed"),
    }
}
