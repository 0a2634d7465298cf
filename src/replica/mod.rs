//! Socket I/O, the event loop, and the shared [`Role`] dispatch table.
//!
//! One place for the scaffolding every role needs (context, socket, timeout
//! dispatch), with the role-specific behavior broken out into sibling
//! modules.

pub mod candidate;
pub mod follower;
pub mod leader;

use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::time::{Duration, Instant};

use log::{error, info};

use crate::codec::{self, Message, BROADCAST};
use crate::term_state::TermState;
use crate::timers;

pub use candidate::CandidateState;
pub use follower::FollowerState;
pub use leader::LeaderState;

const RECV_BUFFER_SIZE: usize = 65535;

/// Fields shared by every role, carried across role transitions untouched
/// except where a handler explicitly updates them.
pub struct ReplicaContext {
    pub this_id: String,
    pub other_ids: HashSet<String>,
    pub simulator_port: u16,
    pub socket: UdpSocket,
    pub no_message_timeout: Duration,
    pub last_append_entries: Instant,
}

impl ReplicaContext {
    fn send(&self, message: &Message) -> Result<(), ReplicaError> {
        let bytes = codec::encode(message);
        self.socket
            .send_to(&bytes, (std::net::Ipv4Addr::LOCALHOST, self.simulator_port))?;
        Ok(())
    }
}

/// Errors that can terminate the replica process. Decode failures and a
/// client request with no known leader are both fatal: there is no retry
/// path within a single replica.
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("fatal decode error: {0}")]
    Decode(#[from] codec::DecodeError),
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("received a client request while no leader has ever been observed")]
    NoLeaderKnown,
}

/// The live role a replica is in. Handlers consume `self` by value and
/// return the next role, so a transition is a move, never a mutation of an
/// existing variant into another shape.
pub enum Role {
    Follower(FollowerState),
    Candidate(CandidateState),
    Leader(LeaderState),
}

impl Role {
    fn get_timeout(&self, ctx: &ReplicaContext) -> Duration {
        match self {
            Role::Follower(_) | Role::Candidate(_) => ctx.no_message_timeout,
            Role::Leader(leader) => leader.get_timeout(ctx),
        }
    }

    fn handle_timeout(self, ctx: &mut ReplicaContext) -> (Option<Message>, Role) {
        match self {
            Role::Follower(state) => state.handle_timeout(ctx),
            Role::Candidate(state) => state.handle_timeout(ctx),
            Role::Leader(state) => state.handle_timeout(ctx),
        }
    }

    fn handle_message(
        self,
        ctx: &mut ReplicaContext,
        message: Message,
    ) -> Result<(Option<Message>, Role), ReplicaError> {
        match self {
            Role::Follower(state) => state.handle_message(ctx, message),
            Role::Candidate(state) => state.handle_message(ctx, message),
            Role::Leader(state) => state.handle_message(ctx, message),
        }
    }
}

/// Redirect a client request to the currently known leader, or fail fatally
/// if none has ever been observed: a non-leader that has never seen an
/// elected leader has no one to point the client at, and treating that as
/// a protocol error (rather than silently dropping the request) makes the
/// failure visible instead of leaving the client waiting forever.
pub(crate) fn redirect_or_fail(
    ctx: &ReplicaContext,
    leader_id_vote: &Option<String>,
    message: &Message,
) -> Result<Message, ReplicaError> {
    let mid = message
        .mid()
        .expect("redirect_or_fail only called for get/put")
        .to_string();
    match leader_id_vote {
        Some(leader) => Ok(Message::Redirect {
            src: ctx.this_id.clone(),
            dst: message.src().to_string(),
            leader: leader.clone(),
            mid,
        }),
        None => Err(ReplicaError::NoLeaderKnown),
    }
}

/// Owns the socket and the single live [`Role`]; drives the event loop.
pub struct Replica {
    pub ctx: ReplicaContext,
    role: Option<Role>,
}

impl Replica {
    pub fn new(
        this_id: String,
        other_ids: HashSet<String>,
        simulator_port: u16,
        socket: UdpSocket,
    ) -> Self {
        let no_message_timeout = timers::generate_election_timeout();
        info!(
            "{}: initialized with election timeout {:?}",
            this_id, no_message_timeout
        );
        let ctx = ReplicaContext {
            this_id,
            other_ids,
            simulator_port,
            socket,
            no_message_timeout,
            last_append_entries: Instant::now(),
        };
        Replica {
            ctx,
            role: Some(Role::Follower(FollowerState {
                term: TermState::default(),
            })),
        }
    }

    /// Emits the mandatory first datagram. Must be called exactly once,
    /// before the event loop starts.
    pub fn initialize_simulator(&self) -> Result<(), ReplicaError> {
        info!("{}: starting up", self.ctx.this_id);
        let hello = Message::Hello {
            src: self.ctx.this_id.clone(),
            dst: BROADCAST.to_string(),
            leader: BROADCAST.to_string(),
        };
        self.ctx.send(&hello)
    }

    /// Blocks for up to the current role's timeout, handles whatever
    /// happens (a decoded message or a timeout), and advances to the next
    /// role. One call is one iteration of the event loop.
    pub fn handle_next_state(&mut self) -> Result<(), ReplicaError> {
        let role = self.role.take().expect("role is always present between calls");
        let timeout = role.get_timeout(&self.ctx);
        self.ctx.socket.set_read_timeout(Some(timeout))?;

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let (response, next_role) = match self.ctx.socket.recv_from(&mut buf) {
            Ok((count, _addr)) => {
                let message = codec::decode(&buf[..count])?;
                role.handle_message(&mut self.ctx, message)?
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                role.handle_timeout(&mut self.ctx)
            }
            Err(e) => return Err(ReplicaError::Io(e)),
        };

        if let Some(response) = response {
            self.ctx.send(&response)?;
        }
        self.role = Some(next_role);
        Ok(())
    }

    /// Runs the event loop until a fatal error occurs. Decode and
    /// "no leader known" errors terminate the replica rather than being
    /// retried.
    pub fn run(&mut self) -> Result<(), ReplicaError> {
        loop {
            if let Err(e) = self.handle_next_state() {
                error!("{}: fatal error: {}", self.ctx.this_id, e);
                return Err(e);
            }
        }
    }
}
