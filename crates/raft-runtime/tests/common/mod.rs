//! # cluster harness
//!
//! why: drive several live nodes over a LocalNetwork and check what they apply
//! relations: shared by the runtime scenario suites in tests/
//! what: Cluster (start, crash, restart, partition, one, leader checks), apply checker

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use raft_runtime::{ApplyMsg, LocalNetwork, NodeConfig, PeerId, Raft};
use raft_storage::InMemoryStorage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What every node has applied, keyed by index.
type Applied = BTreeMap<u64, Vec<u8>>;

#[derive(Default)]
struct Logs {
    applied: HashMap<PeerId, Applied>,
    errors: Vec<String>,
}

pub struct Cluster {
    pub net: LocalNetwork,
    ids: Vec<PeerId>,
    config: NodeConfig,
    nodes: HashMap<PeerId, Raft>,
    consumers: HashMap<PeerId, JoinHandle<()>>,
    storages: HashMap<PeerId, InMemoryStorage>,
    logs: Arc<Mutex<Logs>>,
    snapshot_every: Option<u64>,
}

impl Cluster {
    pub async fn new(n: u64) -> Self {
        Self::with_options(n, true, None).await
    }

    /// `snapshot_every`: each node snapshots its applied map at every multiple of it.
    pub async fn with_options(n: u64, reliable: bool, snapshot_every: Option<u64>) -> Self {
        init_tracing();
        let mut cluster = Self {
            net: LocalNetwork::new(),
            ids: (1..=n).collect(),
            config: NodeConfig::default(),
            nodes: HashMap::new(),
            consumers: HashMap::new(),
            storages: HashMap::new(),
            logs: Arc::new(Mutex::new(Logs::default())),
            snapshot_every,
        };
        cluster.net.set_reliable(reliable);
        for id in cluster.ids.clone() {
            cluster.start_node(id);
        }
        cluster
    }

    pub fn ids(&self) -> &[PeerId] {
        &self.ids
    }

    pub fn raft(&self, id: PeerId) -> &Raft {
        &self.nodes[&id]
    }

    fn logs(&self) -> MutexGuard<'_, Logs> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start (or restart) `id` from whatever its storage holds.
    pub fn start_node(&mut self, id: PeerId) {
        let storage = self.storages.entry(id).or_default().clone();
        let (raft, rx) = Raft::spawn(
            id,
            self.ids.clone(),
            self.config.clone(),
            storage,
            self.net.transport(id),
        )
        .expect("spawn raft node");
        self.logs().applied.insert(id, Applied::new());
        self.net.register(id, raft.clone());
        let consumer =
            tokio::spawn(consume(id, raft.clone(), rx, self.logs.clone(), self.snapshot_every));
        self.consumers.insert(id, consumer);
        self.nodes.insert(id, raft);
    }

    /// Kill `id`; its storage survives for a later restart.
    pub async fn crash(&mut self, id: PeerId) {
        self.net.remove(id);
        if let Some(raft) = self.nodes.remove(&id) {
            raft.shutdown().await;
        }
        // drain whatever the old incarnation already queued before a restart resets its view
        if let Some(consumer) = self.consumers.remove(&id) {
            let _ = consumer.await;
        }
    }

    pub async fn restart(&mut self, id: PeerId) {
        self.crash(id).await;
        self.start_node(id);
    }

    pub fn disconnect(&self, id: PeerId) {
        self.net.disconnect(id);
    }

    pub fn connect(&self, id: PeerId) {
        self.net.connect(id);
    }

    /// Wait until exactly one connected node leads the newest term.
    pub async fn check_one_leader(&self) -> PeerId {
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(500)).await;

            let mut leaders: BTreeMap<u64, Vec<PeerId>> = BTreeMap::new();
            for (&id, raft) in &self.nodes {
                if !self.net.is_connected(id) {
                    continue;
                }
                let (term, is_leader) = raft.get_state().await;
                if is_leader {
                    leaders.entry(term).or_default().push(id);
                }
            }
            for (term, ids) in &leaders {
                assert!(ids.len() <= 1, "term {term} has leaders {ids:?}");
            }
            if let Some((_, ids)) = leaders.iter().next_back() {
                return ids[0];
            }
        }
        panic!("expected one leader, got none");
    }

    pub async fn check_no_leader(&self) {
        for (&id, raft) in &self.nodes {
            if self.net.is_connected(id) {
                assert!(!raft.get_state().await.1, "node {id} claims leadership");
            }
        }
    }

    /// Connected nodes agree on the term; returns it.
    pub async fn check_terms(&self) -> u64 {
        let mut agreed = None;
        for (&id, raft) in &self.nodes {
            if !self.net.is_connected(id) {
                continue;
            }
            let (term, _) = raft.get_state().await;
            match agreed {
                None => agreed = Some(term),
                Some(t) => assert_eq!(t, term, "servers disagree on term"),
            }
        }
        agreed.expect("no connected nodes")
    }

    /// How many nodes applied `index`, and the command they applied.
    pub fn n_committed(&self, index: u64) -> (usize, Option<Vec<u8>>) {
        let logs = self.logs();
        let mut count = 0;
        let mut command: Option<Vec<u8>> = None;
        for (id, applied) in &logs.applied {
            if let Some(cmd) = applied.get(&index) {
                if let Some(seen) = &command {
                    assert_eq!(seen, cmd, "node {id} applied a different command at {index}");
                }
                command = Some(cmd.clone());
                count += 1;
            }
        }
        (count, command)
    }

    /// Submit `cmd` through whichever node accepts it and wait for `expected`
    /// nodes to apply it. Returns its index.
    pub async fn one(&self, cmd: &[u8], expected: usize, retry: bool) -> u64 {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut starter = 0;
        while Instant::now() < deadline {
            let mut index = None;
            for _ in 0..self.ids.len() {
                starter = (starter + 1) % self.ids.len();
                let id = self.ids[starter];
                if !self.net.is_connected(id) {
                    continue;
                }
                let Some(raft) = self.nodes.get(&id) else {
                    continue;
                };
                if let Ok(proposal) = raft.start(cmd.to_vec()).await {
                    index = Some(proposal.index);
                    break;
                }
            }

            let Some(index) = index else {
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            };
            let waiting = Instant::now();
            while waiting.elapsed() < Duration::from_secs(2) {
                let (count, committed) = self.n_committed(index);
                if count >= expected && committed.as_deref() == Some(cmd) {
                    return index;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            if !retry {
                panic!("one({cmd:?}) failed to reach agreement");
            }
        }
        panic!("one({cmd:?}) failed to reach agreement");
    }

    /// Wait until `id` has applied through `index`.
    pub async fn wait_applied(&self, id: PeerId, index: u64) {
        for _ in 0..200 {
            let done = self.logs().applied.get(&id).map_or(false, |a| a.contains_key(&index));
            if done {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("node {id} never applied index {index}");
    }

    /// Panic on any ordering or agreement violation seen by the appliers.
    pub fn check_errors(&self) {
        let logs = self.logs();
        assert!(logs.errors.is_empty(), "apply errors: {:#?}", logs.errors);
    }

    pub async fn shutdown(mut self) {
        for id in self.ids.clone() {
            self.crash(id).await;
        }
        self.check_errors();
    }
}

/// Per-node apply consumer: records commands, checks order and agreement,
/// snapshots on schedule and restores from delivered snapshots.
async fn consume(
    id: PeerId,
    raft: Raft,
    mut rx: mpsc::Receiver<ApplyMsg>,
    logs: Arc<Mutex<Logs>>,
    snapshot_every: Option<u64>,
) {
    while let Some(msg) = rx.recv().await {
        let snapshot = {
            let mut logs = logs.lock().unwrap_or_else(PoisonError::into_inner);
            let logs = &mut *logs;
            match msg {
                ApplyMsg::Command { index, command, .. } => {
                    for (other, applied) in &logs.applied {
                        if let Some(theirs) = applied.get(&index) {
                            if *theirs != command {
                                logs.errors.push(format!(
                                    "node {id} applied {command:?} at {index}, node {other} applied {theirs:?}"
                                ));
                            }
                        }
                    }
                    let mine = logs.applied.entry(id).or_default();
                    let last = mine.keys().next_back().copied().unwrap_or(0);
                    if index != last + 1 {
                        logs.errors.push(format!("node {id} applied {index} right after {last}"));
                    }
                    mine.insert(index, command);
                    match snapshot_every {
                        Some(every) if index % every == 0 => {
                            Some((index, serde_json::to_vec(&*mine).expect("encode applied map")))
                        }
                        _ => None,
                    }
                }
                ApplyMsg::Snapshot { index, data, .. } => {
                    match serde_json::from_slice::<Applied>(&data) {
                        Ok(restored) => {
                            let last = restored.keys().next_back().copied().unwrap_or(0);
                            if last != index {
                                logs.errors.push(format!(
                                    "node {id} got snapshot for {index} holding entries through {last}"
                                ));
                            }
                            logs.applied.insert(id, restored);
                        }
                        Err(e) => logs.errors.push(format!("node {id} got undecodable snapshot: {e}")),
                    }
                    None
                }
            }
        };
        if let Some((index, data)) = snapshot {
            let _ = raft.snapshot(index, data).await;
        }
    }
}
