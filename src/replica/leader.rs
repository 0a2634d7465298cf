//! Leader role: heartbeats, client request handling, log batching.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::codec::{Entry, Message, BROADCAST};
use crate::store::KvStore;
use crate::term_state::{has_quorum, TermState};
use crate::timers;

use super::follower::FollowerState;
use super::{ReplicaContext, ReplicaError, Role};

#[derive(Debug, Clone)]
pub struct LeaderState {
    pub term: TermState,
    pub received_vote_ids: HashSet<String>,
    /// Per-index ack set, keyed by the index of the entry in the combined
    /// log. Does not include self; callers add one when checking quorum.
    pub received_put_responses: HashMap<u64, HashSet<String>>,
    /// Current cadence: heartbeat default, or one of the accelerated
    /// batching timeouts while entries are waiting to be sent.
    pub append_entry_timeout: Duration,
    pub kv_store: KvStore,
}

impl LeaderState {
    /// Three-tier cadence: heartbeat when idle, a short batching delay
    /// while entries trickle in, and an immediate flush once the batch is
    /// full.
    pub fn get_timeout(&self, ctx: &ReplicaContext) -> Duration {
        let uncommitted = self.term.uncommitted_entries.len();
        let chosen = if uncommitted == 0 {
            self.append_entry_timeout
        } else if uncommitted >= timers::MAX_UNCOMMITTED_LOG_COUNT {
            timers::IMMEDIATE_TIMEOUT
        } else {
            timers::UNCOMMITTED_LOG_TIMEOUT
        };
        let expected_endtime = ctx.last_append_entries + chosen;
        expected_endtime
            .saturating_duration_since(Instant::now())
            .max(timers::IMMEDIATE_TIMEOUT)
    }

    /// Broadcasts one `append_request` carrying every uncommitted entry,
    /// then optimistically assumes it succeeded everywhere: the whole batch
    /// moves straight to `log_entries` and the heartbeat clock resets.
    /// `last_log_index`/`last_log_term` are hard-coded to 0 — there is no
    /// per-follower `nextIndex`, so the leader never actually checks
    /// prior-entry consistency before sending.
    pub fn handle_timeout(mut self, ctx: &mut ReplicaContext) -> (Option<Message>, Role) {
        let append_request = Message::AppendRequest {
            src: ctx.this_id.clone(),
            dst: BROADCAST.to_string(),
            leader: ctx.this_id.clone(),
            term: self.term.term_count,
            last_log_index: 0,
            last_log_term: 0,
            entries: self.term.uncommitted_entries.clone(),
            leader_commit_index: self.term.last_commit_log_count(),
        };

        self.term.log_entries.append(&mut self.term.uncommitted_entries);
        self.append_entry_timeout = timers::LEADER_HEARTBEAT_TIMEOUT;
        ctx.last_append_entries = Instant::now();

        (Some(append_request), Role::Leader(self))
    }

    pub fn handle_message(
        mut self,
        ctx: &mut ReplicaContext,
        message: Message,
    ) -> Result<(Option<Message>, Role), ReplicaError> {
        // Any consensus message carrying a higher term means a newer
        // election has already happened elsewhere; step down immediately,
        // checked before role-specific dispatch.
        if let Some(term) = message.term() {
            if term > self.term.term_count {
                info!("{}: stepping down, saw higher term {}", ctx.this_id, term);
                let mut term_state = self.term;
                term_state.term_count = term;
                term_state.leader_id_vote = None;
                ctx.last_append_entries = Instant::now();
                let follower = FollowerState { term: term_state };
                return follower.handle_message(ctx, message);
            }
        }

        match &message {
            Message::Get { .. } => Ok(self.handle_get(ctx, message)),
            Message::Put { .. } => Ok((Some(self.handle_put(ctx, message)), Role::Leader(self))),
            Message::VoteResponse { .. } => {
                self.handle_vote_response(message);
                Ok((None, Role::Leader(self)))
            }
            Message::AppendResponse { .. } => {
                self.handle_append_response(ctx, message);
                Ok((None, Role::Leader(self)))
            }
            // Equal-or-lower-term vote/append requests from a stale peer:
            // nothing to do, the leader holds its ground.
            _ => Ok((None, Role::Leader(self))),
        }
    }

    /// Serves reads from the leader's local map without consulting a
    /// quorum — a stale read is possible if entries are still in flight,
    /// but tolerated for the read latency it buys.
    fn handle_get(self, ctx: &ReplicaContext, message: Message) -> (Option<Message>, Role) {
        let (src, mid, key) = match message {
            Message::Get { src, mid, key, .. } => (src, mid, key),
            _ => unreachable!("handle_get only called for Get"),
        };
        let response = match self.kv_store.get(&key) {
            Some(value) => Message::Ok {
                src: ctx.this_id.clone(),
                dst: src,
                leader: ctx.this_id.clone(),
                mid,
                value: Some(value.clone()),
            },
            None => Message::Fail {
                src: ctx.this_id.clone(),
                dst: src,
                leader: ctx.this_id.clone(),
                mid,
            },
        };
        (Some(response), Role::Leader(self))
    }

    /// Appends to `uncommitted_entries`, applies it to the local map
    /// immediately, and answers `ok` before any follower has acknowledged
    /// it. Optimistic by design: a crash before replication can lose this
    /// write even though the client already saw success.
    fn handle_put(&mut self, ctx: &ReplicaContext, message: Message) -> Message {
        let (src, mid, key, value) = match message {
            Message::Put {
                src, mid, key, value, ..
            } => (src, mid, key, value),
            _ => unreachable!("handle_put only called for Put"),
        };
        self.term.uncommitted_entries.push(Entry {
            term: self.term.term_count,
            key: key.clone(),
            value: value.clone(),
        });
        self.kv_store.put(key, value);
        Message::Ok {
            src: ctx.this_id.clone(),
            dst: src,
            leader: ctx.this_id.clone(),
            mid,
            value: None,
        }
    }

    /// Tracks ongoing support; a leader doesn't act on further votes once
    /// elected, it just keeps the tally current.
    fn handle_vote_response(&mut self, message: Message) {
        if let Message::VoteResponse {
            src, vote_granted: true, ..
        } = message
        {
            debug!("recording continued support from {}", src);
            self.received_vote_ids.insert(src);
        }
    }

    /// Records the sender's ack for every index up to its reported
    /// `last_log_index`, then commits the highest contiguous index whose
    /// ack set (plus the leader itself) has reached quorum and whose term
    /// matches the leader's current term. A response that reports no
    /// progress past what's already committed is either a stale ack or a
    /// refusal; both are no-ops here since there is no per-follower
    /// `nextIndex` to repair.
    fn handle_append_response(&mut self, ctx: &ReplicaContext, message: Message) {
        let (src, term, last_log_index) = match message {
            Message::AppendResponse {
                src,
                term,
                last_log_index,
                ..
            } => (src, term, last_log_index),
            _ => unreachable!("handle_append_response only called for AppendResponse"),
        };

        let committed = self.term.last_commit_log_count();
        if last_log_index <= committed || term != self.term.term_count {
            return;
        }

        let ack_index = last_log_index - 1;
        let acks = self.received_put_responses.entry(ack_index).or_insert_with(HashSet::new);
        acks.insert(src);

        if !has_quorum(acks.len() + 1, ctx.other_ids.len()) {
            return;
        }

        let commit_through = ((ack_index + 1) - committed) as usize;
        let commit_through = commit_through.min(self.term.uncommitted_entries.len());
        let newly_committed: Vec<_> = self.term.uncommitted_entries.drain(0..commit_through).collect();
        debug!("{}: committing {} entries past index {}", ctx.this_id, newly_committed.len(), committed);
        self.term.log_entries.extend(newly_committed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;
    use std::net::UdpSocket;

    fn test_ctx(this_id: &str, other_ids: &[&str]) -> ReplicaContext {
        ReplicaContext {
            this_id: this_id.to_string(),
            other_ids: other_ids.iter().map(|s| s.to_string()).collect(),
            simulator_port: 9999,
            socket: UdpSocket::bind("127.0.0.1:0").unwrap(),
            no_message_timeout: Duration::from_millis(150),
            last_append_entries: Instant::now(),
        }
    }

    fn leader(this_id: &str) -> LeaderState {
        let mut term = TermState::default();
        term.leader_id_vote = Some(this_id.to_string());
        let mut received_vote_ids = HashSet::new();
        received_vote_ids.insert(this_id.to_string());
        LeaderState {
            term,
            received_vote_ids,
            received_put_responses: HashMap::new(),
            append_entry_timeout: timers::LEADER_HEARTBEAT_TIMEOUT,
            kv_store: KvStore::new(),
        }
    }

    #[test]
    fn put_is_acknowledged_before_quorum() {
        let ctx = test_ctx("A", &["B", "C"]);
        let mut l = leader("A");
        let put = Message::Put {
            src: "client".into(),
            dst: "A".into(),
            leader: "A".into(),
            mid: "m1".into(),
            key: "x".into(),
            value: "v".into(),
        };
        let response = l.handle_put(&ctx, put);
        assert_matches!(response, Message::Ok { value: None, .. });
        assert_eq!(l.term.uncommitted_entries.len(), 1);
        assert_eq!(l.kv_store.get("x"), Some(&"v".to_string()));
    }

    #[test]
    fn get_reads_from_local_map_without_quorum() {
        let ctx = test_ctx("A", &["B", "C"]);
        let mut l = leader("A");
        l.kv_store.put("x".into(), "v".into());
        let get = Message::Get {
            src: "client".into(),
            dst: "A".into(),
            leader: "A".into(),
            mid: "m1".into(),
            key: "x".into(),
        };
        let (response, _) = l.handle_get(&ctx, get);
        match response {
            Some(Message::Ok { value, .. }) => assert_eq!(value, Some("v".to_string())),
            _ => panic!("expected ok with the stored value"),
        }
    }

    #[test]
    fn get_fails_for_missing_key() {
        let ctx = test_ctx("A", &["B", "C"]);
        let l = leader("A");
        let get = Message::Get {
            src: "client".into(),
            dst: "A".into(),
            leader: "A".into(),
            mid: "m1".into(),
            key: "missing".into(),
        };
        let (response, _) = l.handle_get(&ctx, get);
        assert_matches!(response, Some(Message::Fail { .. }));
    }

    #[test]
    fn timeout_moves_uncommitted_to_committed_and_resets_cadence() {
        let mut ctx = test_ctx("A", &["B", "C"]);
        let mut l = leader("A");
        l.term.uncommitted_entries.push(Entry {
            term: 0,
            key: "x".into(),
            value: "v".into(),
        });
        let (response, next) = l.handle_timeout(&mut ctx);
        assert_matches!(response, Some(Message::AppendRequest { .. }));
        match next {
            Role::Leader(l) => {
                assert!(l.term.uncommitted_entries.is_empty());
                assert_eq!(l.term.log_entries.len(), 1);
                assert_eq!(l.append_entry_timeout, timers::LEADER_HEARTBEAT_TIMEOUT);
            }
            _ => panic!("expected to remain Leader"),
        }
    }

    #[test]
    fn higher_term_message_steps_down_to_follower() {
        let mut ctx = test_ctx("A", &["B"]);
        let l = leader("A");
        let request = Message::AppendRequest {
            src: "B".into(),
            dst: "A".into(),
            leader: "B".into(),
            term: 9,
            last_log_index: 0,
            last_log_term: 0,
            entries: vec![],
            leader_commit_index: 0,
        };
        let (_, next) = l.handle_message(&mut ctx, request).unwrap();
        match next {
            Role::Follower(f) => assert_eq!(f.term.term_count, 9),
            _ => panic!("expected to step down to Follower"),
        }
    }

    #[test]
    fn append_response_commits_once_quorum_acks_the_index() {
        let mut ctx = test_ctx("A", &["B", "C"]);
        let mut l = leader("A");
        l.term.uncommitted_entries.push(Entry {
            term: 0,
            key: "x".into(),
            value: "v".into(),
        });

        let ack_from = |src: &str| Message::AppendResponse {
            src: src.to_string(),
            dst: "A".into(),
            leader: "A".into(),
            term: 0,
            last_log_index: 1,
            last_log_term: 0,
        };

        l.handle_append_response(&ctx, ack_from("B"));
        assert!(l.term.log_entries.is_empty());

        l.handle_append_response(&ctx, ack_from("C"));
        assert_eq!(l.term.log_entries.len(), 1);
        assert!(l.term.uncommitted_entries.is_empty());
        let _ = &mut ctx;
    }
}
