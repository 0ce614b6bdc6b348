//! # replication
//!
//! why: leader-driven log propagation and the follower consistency check
//! relations: extends node.rs; snapshot.rs takes over when entries are compacted
//! what: AppendEntries construction, handling, reply feedback, commit advancement

use crate::{
    AppendEntriesArgs, AppendEntriesReply, AppendRound, InstallSnapshotArgs, NodeState, PeerId,
    RaftMessage, RaftNode,
};

impl RaftNode {
    /// Send every follower whatever it is missing (empty batches are heartbeats)
    /// and push the heartbeat deadline out by one interval.
    pub(crate) fn broadcast_append_entries(&mut self) {
        let peers: Vec<PeerId> = self.peers().collect();
        for peer in peers {
            if let Some(message) = self.create_append_entries(peer) {
                self.send(peer, message);
            }
        }
        self.heartbeat_deadline = Some(self.now + self.config.heartbeat_interval);
    }

    /// Build the next replication request for `peer`.
    ///
    /// Entries start at the peer's nextIndex; when that position has been
    /// compacted away the snapshot is sent instead. None unless leader.
    pub fn create_append_entries(&self, peer: PeerId) -> Option<RaftMessage> {
        if self.state != NodeState::Leader {
            return None;
        }
        let last_index = self.log.last_index();
        let next = self
            .next_index
            .get(&peer)
            .copied()
            .unwrap_or(last_index + 1)
            .clamp(1, last_index + 1);

        if next <= self.log.snapshot_index() {
            let snapshot = self.snapshot.as_ref()?;
            return Some(RaftMessage::InstallSnapshot(InstallSnapshotArgs {
                term: self.current_term,
                leader_id: self.id,
                last_included_index: snapshot.meta.last_included_index,
                last_included_term: snapshot.meta.last_included_term,
                data: snapshot.data.clone(),
            }));
        }

        let prev_log_index = next - 1;
        let prev_log_term = self.log.term_at(prev_log_index)?;
        Some(RaftMessage::AppendEntries(AppendEntriesArgs {
            term: self.current_term,
            leader_id: self.id,
            prev_log_index,
            prev_log_term,
            entries: self.log.entries_from(next, self.config.max_entries_per_append),
            leader_commit: self.commit_index,
        }))
    }

    /// Follower side of replication: term check, consistency check, conflict
    /// repair and commit propagation.
    pub fn handle_append_entries(&mut self, args: AppendEntriesArgs) -> AppendEntriesReply {
        if args.term < self.current_term {
            tracing::trace!(id = self.id, leader = args.leader_id, term = args.term, "rejecting stale append entries");
            return AppendEntriesReply::rejected(self.current_term, 0, None);
        }
        if args.term > self.current_term || self.state != NodeState::Follower {
            self.become_follower(args.term);
        }
        self.leader_id = Some(args.leader_id);
        self.reset_election_timer();

        let AppendEntriesArgs {
            mut prev_log_index,
            mut prev_log_term,
            mut entries,
            leader_commit,
            ..
        } = args;

        // part of the batch may already be folded into our snapshot
        let boundary = self.log.snapshot_index();
        if prev_log_index < boundary {
            let covered = (boundary - prev_log_index) as usize;
            if covered >= entries.len() {
                return AppendEntriesReply::accepted(self.current_term);
            }
            entries.drain(..covered);
            prev_log_index = boundary;
            prev_log_term = self.log.snapshot_term();
        }

        if prev_log_index > self.log.last_index() {
            let conflict_index = self.log.last_index() + 1;
            tracing::debug!(id = self.id, prev_log_index, conflict_index, "log too short");
            return AppendEntriesReply::rejected(self.current_term, conflict_index, None);
        }
        if let Some(term) = self.log.term_at(prev_log_index) {
            if term != prev_log_term {
                let conflict_index = self.log.first_index_of_term(term, prev_log_index);
                tracing::debug!(id = self.id, prev_log_index, prev_log_term, term, conflict_index, "log mismatch");
                return AppendEntriesReply::rejected(self.current_term, conflict_index, Some(term));
            }
        }

        let last_new_index = prev_log_index + entries.len() as u64;
        let mut changed = false;
        for entry in entries {
            match self.log.term_at(entry.index) {
                Some(term) if term == entry.term => continue,
                Some(_) => {
                    if entry.index <= self.commit_index {
                        tracing::error!(
                            id = self.id,
                            index = entry.index,
                            commit_index = self.commit_index,
                            "refusing to overwrite a committed entry"
                        );
                        return AppendEntriesReply::rejected(self.current_term, self.commit_index + 1, None);
                    }
                    tracing::debug!(id = self.id, from = entry.index, "truncating conflicting suffix");
                    self.log.truncate_from(entry.index);
                    self.log.push(entry);
                    changed = true;
                }
                None => {
                    self.log.push(entry);
                    changed = true;
                }
            }
        }
        if changed {
            self.mark_dirty();
        }

        if leader_commit > self.commit_index {
            let commit = leader_commit.min(last_new_index);
            if commit > self.commit_index {
                tracing::debug!(id = self.id, from = self.commit_index, to = commit, "follower commit advanced");
                self.commit_index = commit;
            }
        }
        AppendEntriesReply::accepted(self.current_term)
    }

    /// Leader side feedback for one AppendEntries round.
    ///
    /// Returns true if the commit index advanced.
    pub fn handle_append_entries_reply(
        &mut self,
        from: PeerId,
        round: AppendRound,
        reply: AppendEntriesReply,
    ) -> bool {
        if reply.term > self.current_term {
            self.become_follower(reply.term);
            return false;
        }
        if self.state != NodeState::Leader || round.term != self.current_term {
            tracing::trace!(id = self.id, peer = from, round_term = round.term, "dropping stale append reply");
            return false;
        }

        let matched = self.match_index.get(&from).copied().unwrap_or(0);
        if reply.success {
            let matched = matched.max(round.last_index());
            self.match_index.insert(from, matched);
            let next = self.next_index.get(&from).copied().unwrap_or(1).max(matched + 1);
            self.next_index.insert(from, next);

            if next <= self.log.last_index() {
                if let Some(message) = self.create_append_entries(from) {
                    self.send(from, message);
                }
            }
            return self.advance_commit_index();
        }

        let hint = match reply.conflict_term {
            Some(term) => self
                .log
                .last_index_of_term(term)
                .map_or(reply.conflict_index, |index| index + 1),
            None => reply.conflict_index,
        };
        let next = hint.min(round.prev_log_index).max(matched + 1).max(1);
        tracing::debug!(id = self.id, peer = from, next, "follower rejected, backing off");
        self.next_index.insert(from, next);
        if let Some(message) = self.create_append_entries(from) {
            self.send(from, message);
        }
        false
    }

    /// Commit the highest index held by a majority, provided it was appended
    /// in the current term. Earlier-term entries commit only underneath it.
    pub(crate) fn advance_commit_index(&mut self) -> bool {
        if self.state != NodeState::Leader {
            return false;
        }
        let mut n = self.log.last_index();
        while n > self.commit_index {
            if self.log.term_at(n) != Some(self.current_term) {
                break;
            }
            let replicas = 1 + self.match_index.values().filter(|&&m| m >= n).count();
            if replicas >= self.quorum_size() {
                tracing::debug!(id = self.id, from = self.commit_index, to = n, "leader commit advanced");
                self.commit_index = n;
                return true;
            }
            n -= 1;
        }
        false
    }
}
