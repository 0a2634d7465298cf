//! Candidate role: election coordination, vote tallying, quorum detection.

use std::collections::HashSet;
use std::time::Instant;

use log::info;

use crate::codec::{Message, BROADCAST};
use crate::store::KvStore;
use crate::term_state::{has_quorum, TermState};
use crate::timers;

use super::follower::FollowerState;
use super::leader::LeaderState;
use super::{redirect_or_fail, ReplicaContext, ReplicaError, Role};

#[derive(Debug, Clone, Default)]
pub struct CandidateState {
    pub term: TermState,
    /// Ids that have granted a vote this term. Always contains self.
    pub received_vote_ids: HashSet<String>,
}

impl CandidateState {
    pub fn generate_vote_request(&self, ctx: &ReplicaContext) -> Message {
        Message::VoteRequest {
            src: ctx.this_id.clone(),
            dst: BROADCAST.to_string(),
            leader: BROADCAST.to_string(),
            term: self.term.term_count,
            candidate_id: ctx.this_id.clone(),
            last_log_index: self.term.last_applied_log_count(),
            last_log_term: self.term.term_count,
        }
    }

    /// Increment the term, reset `received_vote_ids` to just self, and start
    /// another round of voting. `ctx.no_message_timeout` is left untouched:
    /// the election timeout is randomized once at replica startup and
    /// carried through every role change, not redrawn per retry.
    pub fn handle_timeout(mut self, ctx: &mut ReplicaContext) -> (Option<Message>, Role) {
        info!("{}: election timeout at CANDIDATE", ctx.this_id);
        self.term.term_count += 1;
        self.received_vote_ids.clear();
        self.received_vote_ids.insert(ctx.this_id.clone());
        let vote_request = self.generate_vote_request(ctx);
        (Some(vote_request), Role::Candidate(self))
    }

    pub fn handle_message(
        self,
        ctx: &mut ReplicaContext,
        message: Message,
    ) -> Result<(Option<Message>, Role), ReplicaError> {
        match &message {
            Message::VoteResponse { .. } => Ok(self.handle_vote_response(ctx, message)),
            Message::VoteRequest { .. } => Ok(self.handle_vote_request(ctx, message)),
            Message::AppendRequest { .. } => Ok(self.handle_append_request(ctx, message)),
            Message::Get { .. } | Message::Put { .. } => {
                let response = redirect_or_fail(ctx, &self.term.leader_id_vote, &message)?;
                Ok((Some(response), Role::Candidate(self)))
            }
            _ => Ok((None, Role::Candidate(self))),
        }
    }

    /// Tally a granted vote; transition to Leader once a quorum is reached.
    /// Ungranted votes are dropped: a Candidate never grants a competing
    /// vote itself, so ungranted responses are the only kind it ever needs
    /// to ignore here.
    fn handle_vote_response(mut self, ctx: &mut ReplicaContext, message: Message) -> (Option<Message>, Role) {
        let (src, vote_granted) = match message {
            Message::VoteResponse {
                src, vote_granted, ..
            } => (src, vote_granted),
            _ => unreachable!("handle_vote_response only called for VoteResponse"),
        };

        if !vote_granted {
            return (None, Role::Candidate(self));
        }

        self.received_vote_ids.insert(src);

        if has_quorum(self.received_vote_ids.len(), ctx.other_ids.len()) {
            info!("{}: elected leader for term {}", ctx.this_id, self.term.term_count);
            let kv_store = KvStore::from_entries(
                self.term
                    .log_entries
                    .iter()
                    .chain(self.term.uncommitted_entries.iter()),
            );
            // Force an immediate heartbeat on the next loop iteration.
            ctx.last_append_entries = Instant::now()
                .checked_sub(timers::LEADER_HEARTBEAT_TIMEOUT)
                .unwrap_or_else(Instant::now);
            let leader = LeaderState {
                term: self.term,
                received_vote_ids: self.received_vote_ids,
                received_put_responses: Default::default(),
                append_entry_timeout: timers::LEADER_HEARTBEAT_TIMEOUT,
                kv_store,
            };
            return (None, Role::Leader(leader));
        }

        (None, Role::Candidate(self))
    }

    /// A Candidate's `vote_request` handling never grants a competing vote
    /// — except one carve-out: a strictly higher term means an election has
    /// moved on without us, so we step down to Follower and re-dispatch as
    /// a Follower vote request.
    fn handle_vote_request(self, ctx: &mut ReplicaContext, message: Message) -> (Option<Message>, Role) {
        let term = message.term().expect("VoteRequest always carries a term");
        if term > self.term.term_count {
            let mut term_state = self.term;
            term_state.term_count = term;
            term_state.leader_id_vote = None;
            let follower = FollowerState { term: term_state };
            // Follower::handle_vote_request never returns an Err.
            return follower
                .handle_message(ctx, message)
                .expect("Follower vote-request handling is infallible");
        }
        (None, Role::Candidate(self))
    }

    /// A term-compatible `append_request` means another replica has already
    /// become leader this term (or a later one), so we step down to
    /// Follower at the request's term and delegate to the Follower handler
    /// for the same request.
    fn handle_append_request(self, ctx: &mut ReplicaContext, message: Message) -> (Option<Message>, Role) {
        let (term, last_log_index, leader) = match &message {
            Message::AppendRequest {
                term,
                last_log_index,
                leader,
                ..
            } => (*term, *last_log_index, leader.clone()),
            _ => unreachable!("handle_append_request only called for AppendRequest"),
        };

        if term < self.term.term_count {
            return (None, Role::Candidate(self));
        }
        if last_log_index < self.term.last_commit_log_count() {
            return (None, Role::Candidate(self));
        }
        if term == self.term.term_count && self.term.last_commit_log_count() == last_log_index {
            return (None, Role::Candidate(self));
        }

        let mut term_state = self.term;
        term_state.term_count = term;
        term_state.leader_id_vote = Some(leader);
        let follower = FollowerState { term: term_state };
        follower.handle_append_request(ctx, message)
    }
}
