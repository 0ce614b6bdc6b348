//! # apply
//!
//! why: hand committed entries to the consumer without holding the node lock
//! relations: spawned by node.rs; woken through Inner::apply_ready
//! what: apply loop feeding the bounded, ordered ApplyMsg channel

use raft_core::ApplyMsg;
use tokio::sync::{mpsc, watch};

use crate::Raft;

pub(crate) async fn run(
    raft: Raft,
    tx: mpsc::Sender<ApplyMsg>,
    mut shutdown: watch::Receiver<bool>,
) {
    let max = raft.inner.config.apply_buffer;
    'outer: loop {
        let batch = match raft.with_core(|core| core.next_apply_batch(max)).await {
            Ok(batch) => batch,
            Err(_) => break,
        };

        if batch.is_empty() {
            tokio::select! {
                _ = raft.inner.apply_ready.notified() => continue,
                _ = shutdown.changed() => break,
            }
        }

        for msg in batch {
            let index = msg.index();
            tokio::select! {
                sent = tx.send(msg) => {
                    if sent.is_err() {
                        tracing::debug!(id = raft.inner.id, index, "apply receiver dropped");
                        break 'outer;
                    }
                }
                _ = shutdown.changed() => break 'outer,
            }
        }
    }
    tracing::debug!(id = raft.inner.id, "apply loop exited");
}
