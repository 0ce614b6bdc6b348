//! # ticker
//!
//! why: the single place timers fire; deadlines live in the core as values
//! relations: spawned by node.rs, calls RaftNode::tick through Raft::with_core
//! what: scheduler loop

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::Raft;

pub(crate) async fn run(raft: Raft, mut shutdown: watch::Receiver<bool>) {
    let mut ticks = interval(Duration::from_millis(raft.inner.config.tick_interval_ms));
    // a stalled runtime should not replay a burst of ticks
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                let now = raft.now();
                if raft.with_core(|core| core.tick(now)).await.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!(id = raft.inner.id, "scheduler loop exited");
}
