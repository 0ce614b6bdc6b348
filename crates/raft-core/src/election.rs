//! # election
//!
//! why: randomized-timeout leader election with term numbers and vote requests
//! relations: extends node.rs; triggered by RaftNode::tick
//! what: start_election, vote granting rule, vote tallying, become_leader

use crate::{NodeState, PeerId, RaftMessage, RaftNode, RequestVoteArgs, RequestVoteReply};

impl RaftNode {
    /// Become a candidate for the next term and ask every peer for a vote.
    ///
    /// Returns the RequestVote sent to each peer.
    pub fn start_election(&mut self) -> RequestVoteArgs {
        self.state = NodeState::Candidate;
        self.current_term += 1;
        self.voted_for = Some(self.id);
        self.leader_id = None;
        self.votes_received.clear();
        self.votes_received.insert(self.id);
        self.mark_dirty();
        self.reset_election_timer();

        tracing::info!(id = self.id, term = self.current_term, "starting election");

        let args = RequestVoteArgs {
            term: self.current_term,
            candidate_id: self.id,
            last_log_index: self.log.last_index(),
            last_log_term: self.log.last_term(),
        };
        let peers: Vec<PeerId> = self.peers().collect();
        for peer in peers {
            self.send(peer, RaftMessage::RequestVote(args.clone()));
        }

        if self.has_quorum() {
            self.become_leader();
        }
        args
    }

    /// Decide a RequestVote.
    ///
    /// Grants iff the candidate's term is current, no other candidate holds
    /// this node's vote for the term, and the candidate's log is at least as
    /// up-to-date. A granted vote is persisted before the reply leaves.
    pub fn handle_request_vote(&mut self, args: RequestVoteArgs) -> RequestVoteReply {
        if args.term > self.current_term {
            self.become_follower(args.term);
        }
        if args.term < self.current_term {
            tracing::trace!(id = self.id, candidate = args.candidate_id, term = args.term, "rejecting stale vote request");
            return RequestVoteReply { term: self.current_term, vote_granted: false };
        }

        let free_to_vote = self.voted_for.map_or(true, |v| v == args.candidate_id);
        let up_to_date = self.log.is_up_to_date(args.last_log_index, args.last_log_term);
        let vote_granted = free_to_vote && up_to_date;

        if vote_granted {
            if self.voted_for.is_none() {
                self.voted_for = Some(args.candidate_id);
                self.mark_dirty();
            }
            self.reset_election_timer();
        }
        tracing::debug!(
            id = self.id,
            term = self.current_term,
            candidate = args.candidate_id,
            vote_granted,
            up_to_date,
            "handled vote request"
        );
        RequestVoteReply { term: self.current_term, vote_granted }
    }

    /// Count a vote reply for the election started in `sent_term`.
    ///
    /// Returns true if this reply made the node leader.
    pub fn handle_request_vote_reply(
        &mut self,
        from: PeerId,
        sent_term: u64,
        reply: RequestVoteReply,
    ) -> bool {
        if reply.term > self.current_term {
            self.become_follower(reply.term);
            return false;
        }
        if self.state != NodeState::Candidate || sent_term != self.current_term {
            tracing::trace!(id = self.id, peer = from, sent_term, "dropping stale vote reply");
            return false;
        }
        if !reply.vote_granted {
            return false;
        }

        self.votes_received.insert(from);
        if self.has_quorum() {
            self.become_leader();
            return true;
        }
        false
    }

    /// Take leadership: reset per-follower progress, swap the election timer
    /// for the heartbeat timer, and assert authority right away.
    pub(crate) fn become_leader(&mut self) {
        tracing::info!(
            id = self.id,
            term = self.current_term,
            votes = self.votes_received.len(),
            "became leader"
        );
        self.state = NodeState::Leader;
        self.leader_id = Some(self.id);
        self.votes_received.clear();

        let next = self.log.last_index() + 1;
        let peers: Vec<PeerId> = self.peers().collect();
        self.next_index = peers.iter().map(|&p| (p, next)).collect();
        self.match_index = peers.iter().map(|&p| (p, 0)).collect();

        self.election_deadline = None;
        self.broadcast_append_entries();
    }
}
