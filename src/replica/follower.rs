//! Follower role: passive replication, vote granting, election trigger.

use log::{debug, info, warn};

use crate::codec::{Message, BROADCAST};
use crate::term_state::TermState;

use super::candidate::CandidateState;
use super::{redirect_or_fail, ReplicaContext, ReplicaError, Role};

#[derive(Debug, Clone, Default)]
pub struct FollowerState {
    pub term: TermState,
}

impl FollowerState {
    /// Converts to Candidate at `term_count + 1`, votes for self, and
    /// broadcasts a `vote_request`.
    pub fn handle_timeout(self, ctx: &mut ReplicaContext) -> (Option<Message>, Role) {
        info!("{}: election timeout at FOLLOWER", ctx.this_id);
        let mut term = self.term;
        term.term_count += 1;
        term.leader_id_vote = Some(ctx.this_id.clone());

        let mut received_vote_ids = std::collections::HashSet::new();
        received_vote_ids.insert(ctx.this_id.clone());
        let candidate = CandidateState {
            term,
            received_vote_ids,
        };

        let vote_request = candidate.generate_vote_request(ctx);
        (Some(vote_request), Role::Candidate(candidate))
    }

    pub fn handle_message(
        self,
        ctx: &mut ReplicaContext,
        message: Message,
    ) -> Result<(Option<Message>, Role), ReplicaError> {
        match &message {
            Message::VoteRequest { .. } => Ok(self.handle_vote_request(ctx, message)),
            Message::AppendRequest { .. } => Ok(self.handle_append_request(ctx, message)),
            Message::Get { .. } | Message::Put { .. } => {
                let response = redirect_or_fail(ctx, &self.term.leader_id_vote, &message)?;
                Ok((Some(response), Role::Follower(self)))
            }
            // hello and anything else a follower isn't specified to act on.
            _ => Ok((None, Role::Follower(self))),
        }
    }

    /// Grant iff the candidate's term is at least as current as ours and we
    /// haven't already voted this term; otherwise reject on a stale term, or
    /// silently drop if we've already voted.
    fn handle_vote_request(mut self, ctx: &ReplicaContext, message: Message) -> (Option<Message>, Role) {
        let (src, term, candidate_id) = match message {
            Message::VoteRequest {
                src,
                term,
                candidate_id,
                ..
            } => (src, term, candidate_id),
            _ => unreachable!("handle_vote_request only called for VoteRequest"),
        };

        if term < self.term.term_count {
            warn!("{}: rejecting vote request from {} (stale term {})", ctx.this_id, src, term);
            let response = Message::VoteResponse {
                src: ctx.this_id.clone(),
                dst: src,
                leader: BROADCAST.to_string(),
                term: self.term.term_count,
                vote_granted: false,
            };
            return (Some(response), Role::Follower(self));
        }

        if self.term.leader_id_vote.is_some() {
            debug!("{}: already voted this term, dropping vote request from {}", ctx.this_id, src);
            return (None, Role::Follower(self));
        }

        self.term.leader_id_vote = Some(candidate_id);
        debug!("{}: granting vote to {}", ctx.this_id, src);
        let response = Message::VoteResponse {
            src: ctx.this_id.clone(),
            dst: src,
            leader: BROADCAST.to_string(),
            term: self.term.term_count,
            vote_granted: true,
        };
        (Some(response), Role::Follower(self))
    }

    /// Applies the log-consistency checks and returns either a refusal, a
    /// positive ack, or (when adopting a new leader) no response at all.
    pub(super) fn handle_append_request(
        mut self,
        ctx: &ReplicaContext,
        message: Message,
    ) -> (Option<Message>, Role) {
        let (src, leader, term, last_log_index, last_log_term, entries, leader_commit_index) =
            match message {
                Message::AppendRequest {
                    src,
                    leader,
                    term,
                    last_log_index,
                    last_log_term,
                    entries,
                    leader_commit_index,
                    ..
                } => (
                    src,
                    leader,
                    term,
                    last_log_index,
                    last_log_term,
                    entries,
                    leader_commit_index,
                ),
                _ => unreachable!("handle_append_request only called for AppendRequest"),
            };

        let current_term = self.term.term_count;
        let committed = self.term.last_commit_log_count();

        // 1. Stale leader.
        if term < current_term {
            warn!("{}: refusing append from {} (stale term {})", ctx.this_id, src, term);
            return (Some(self.refusal(ctx, &src)), Role::Follower(self));
        }

        // 2. Leader behind our committed count.
        if last_log_index < committed {
            return (Some(self.refusal(ctx, &src)), Role::Follower(self));
        }

        // 3. New leader: adopt silently, don't touch the logs, don't ack.
        //    The ack for this datagram is lost; the leader's next heartbeat
        //    will get a response once we're caught up on who leads.
        if self.term.leader_id_vote.as_deref() != Some(leader.as_str()) {
            info!("{}: adopting leader {}", ctx.this_id, leader);
            self.term.leader_id_vote = Some(leader);
            return (None, Role::Follower(self));
        }

        // 4. Gap in the log.
        if last_log_index != committed {
            return (Some(self.refusal(ctx, &src)), Role::Follower(self));
        }

        // 5 & 6. Nothing committed yet: require a matching term on the
        // (still-empty) log, then accept the whole batch as uncommitted.
        if committed == 0 {
            if current_term != last_log_term {
                return (Some(self.refusal(ctx, &src)), Role::Follower(self));
            }
            self.term.uncommitted_entries = entries;
            return (Some(self.refusal(ctx, &src)), Role::Follower(self));
        }

        // 7. Compare the last applied entry against the leader's claim.
        let matched_term = self
            .term
            .last_applied_entry()
            .expect("committed > 0 implies an applied entry exists")
            .term;
        if matched_term != last_log_term || matched_term < current_term {
            return (Some(self.refusal(ctx, &src)), Role::Follower(self));
        }

        let applied = self.term.last_applied_log_count();
        let commitable = (leader_commit_index as i64 - applied as i64)
            .max(0)
            .min(self.term.uncommitted_entries.len() as i64) as usize;
        let newly_committed: Vec<_> = self.term.uncommitted_entries.drain(0..commitable).collect();
        self.term.log_entries.extend(newly_committed);

        let last_term = self
            .term
            .log_entries
            .last()
            .map(|e| e.term)
            .unwrap_or(current_term);
        let response = Message::AppendResponse {
            src: ctx.this_id.clone(),
            dst: src,
            leader: self.term.leader_id_vote.clone().unwrap_or_default(),
            term: current_term,
            last_log_index: self.term.last_commit_log_count(),
            last_log_term: last_term,
        };
        (Some(response), Role::Follower(self))
    }

    /// Refusal signal: echoes the replica's own last-log index/term so the
    /// leader can tell how far behind (or ahead) this follower actually is.
    fn refusal(&self, ctx: &ReplicaContext, dst: &str) -> Message {
        Message::AppendResponse {
            src: ctx.this_id.clone(),
            dst: dst.to_string(),
            leader: self.term.leader_id_vote.clone().unwrap_or_default(),
            term: self.term.term_count,
            last_log_index: self.term.last_commit_log_count(),
            last_log_term: self.term.term_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Entry;
    use matches::assert_matches;
    use std::collections::HashSet;
    use std::net::UdpSocket;

    fn test_ctx(this_id: &str) -> ReplicaContext {
        ReplicaContext {
            this_id: this_id.to_string(),
            other_ids: HashSet::new(),
            simulator_port: 9999,
            socket: UdpSocket::bind("127.0.0.1:0").unwrap(),
            no_message_timeout: std::time::Duration::from_millis(150),
            last_append_entries: std::time::Instant::now(),
        }
    }

    #[test]
    fn election_timeout_produces_candidate_voting_for_self() {
        let mut ctx = test_ctx("A");
        let follower = FollowerState {
            term: TermState::default(),
        };
        let (response, next) = follower.handle_timeout(&mut ctx);
        assert_matches!(response, Some(Message::VoteRequest { .. }));
        match next {
            Role::Candidate(candidate) => {
                assert_eq!(candidate.term.term_count, 1);
                assert!(candidate.received_vote_ids.contains("A"));
            }
            _ => panic!("expected Candidate"),
        }
    }

    #[test]
    fn grants_vote_when_unvoted() {
        let ctx = test_ctx("B");
        let follower = FollowerState {
            term: TermState::default(),
        };
        let request = Message::VoteRequest {
            src: "A".into(),
            dst: "B".into(),
            leader: "FFFF".into(),
            term: 1,
            candidate_id: "A".into(),
            last_log_index: 0,
            last_log_term: 0,
        };
        let (response, next) = follower.handle_vote_request(&ctx, request);
        match response {
            Some(Message::VoteResponse { vote_granted, .. }) => assert!(vote_granted),
            _ => panic!("expected a vote response"),
        }
        match next {
            Role::Follower(f) => assert_eq!(f.term.leader_id_vote.as_deref(), Some("A")),
            _ => panic!("expected to remain Follower"),
        }
    }

    #[test]
    fn does_not_vote_twice_in_same_term() {
        let ctx = test_ctx("B");
        let mut term = TermState::default();
        term.leader_id_vote = Some("A".into());
        let follower = FollowerState { term };
        let request = Message::VoteRequest {
            src: "C".into(),
            dst: "B".into(),
            leader: "FFFF".into(),
            term: 1,
            candidate_id: "C".into(),
            last_log_index: 0,
            last_log_term: 0,
        };
        let (response, _) = follower.handle_vote_request(&ctx, request);
        assert!(response.is_none());
    }

    #[test]
    fn redirects_get_when_leader_known() {
        let ctx = test_ctx("B");
        let mut term = TermState::default();
        term.leader_id_vote = Some("A".into());
        let follower = FollowerState { term };
        let get = Message::Get {
            src: "client".into(),
            dst: "B".into(),
            leader: "".into(),
            mid: "m1".into(),
            key: "x".into(),
        };
        let (response, _) = follower.handle_message(&mut test_ctx("B"), get).unwrap();
        match response {
            Some(Message::Redirect { leader, mid, .. }) => {
                assert_eq!(leader, "A");
                assert_eq!(mid, "m1");
            }
            _ => panic!("expected a redirect"),
        }
        let _ = ctx;
    }

    #[test]
    fn get_fails_fatally_with_no_leader_known() {
        let mut ctx = test_ctx("B");
        let follower = FollowerState {
            term: TermState::default(),
        };
        let get = Message::Get {
            src: "client".into(),
            dst: "B".into(),
            leader: "".into(),
            mid: "m1".into(),
            key: "x".into(),
        };
        let result = follower.handle_message(&mut ctx, get);
        assert!(matches!(result, Err(ReplicaError::NoLeaderKnown)));
    }

    #[test]
    fn stale_term_append_is_refused_without_mutating_log() {
        let mut ctx = test_ctx("B");
        let mut term = TermState::default();
        term.term_count = 5;
        term.leader_id_vote = Some("A".into());
        let follower = FollowerState { term };
        let request = Message::AppendRequest {
            src: "A".into(),
            dst: "B".into(),
            leader: "A".into(),
            term: 4,
            last_log_index: 0,
            last_log_term: 0,
            entries: vec![],
            leader_commit_index: 0,
        };
        let (response, next) = follower.handle_append_request(&ctx, request);
        match response {
            Some(Message::AppendResponse { term, last_log_index, last_log_term, .. }) => {
                assert_eq!(term, 5);
                assert_eq!(last_log_index, 0);
                assert_eq!(last_log_term, 5);
            }
            _ => panic!("expected a refusal AppendResponse"),
        }
        match next {
            Role::Follower(f) => assert!(f.term.log_entries.is_empty()),
            _ => panic!("expected to remain Follower"),
        }
        let _ = ctx;
    }

    #[test]
    fn first_append_from_unknown_leader_is_adopted_silently() {
        let ctx = test_ctx("B");
        let follower = FollowerState {
            term: TermState::default(),
        };
        let request = Message::AppendRequest {
            src: "A".into(),
            dst: "B".into(),
            leader: "A".into(),
            term: 1,
            last_log_index: 0,
            last_log_term: 1,
            entries: vec![Entry {
                term: 1,
                key: "x".into(),
                value: "v".into(),
            }],
            leader_commit_index: 0,
        };
        let (response, next) = follower.handle_append_request(&ctx, request);
        assert!(response.is_none());
        match next {
            Role::Follower(f) => {
                assert_eq!(f.term.leader_id_vote.as_deref(), Some("A"));
                assert!(f.term.uncommitted_entries.is_empty());
            }
            _ => panic!("expected to remain Follower"),
        }
    }

    #[test]
    fn accepts_first_batch_once_leader_established() {
        let ctx = test_ctx("B");
        let mut term = TermState::default();
        term.leader_id_vote = Some("A".into());
        let follower = FollowerState { term };
        let request = Message::AppendRequest {
            src: "A".into(),
            dst: "B".into(),
            leader: "A".into(),
            term: 0,
            last_log_index: 0,
            last_log_term: 0,
            entries: vec![Entry {
                term: 0,
                key: "x".into(),
                value: "v".into(),
            }],
            leader_commit_index: 0,
        };
        let (response, next) = follower.handle_append_request(&ctx, request);
        assert!(response.is_some());
        match next {
            Role::Follower(f) => assert_eq!(f.term.uncommitted_entries.len(), 1),
            _ => panic!("expected to remain Follower"),
        }
    }
}
