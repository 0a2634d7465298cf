//! Pure data shared by every role: term, logs, and votes.
//!
//! Kept deliberately free of I/O and timers (those live in [`crate::replica`]
//! and [`crate::timers`]) so the commit/log-consistency rules can be tested
//! without a socket.

use crate::codec::Entry;

/// Term-scoped state every role carries forward across transitions.
///
/// On a role transition `log_entries` and `uncommitted_entries` must be
/// preserved byte-for-byte, which falls out naturally here since
/// transitions move this struct by value rather than reconstructing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermState {
    pub term_count: u64,
    /// Entries accepted but not yet known to be replicated to a quorum.
    pub uncommitted_entries: Vec<Entry>,
    /// Entries safe to apply; never overwritten once committed.
    pub log_entries: Vec<Entry>,
    /// The leader this replica currently recognizes (Follower), or the
    /// candidate it voted for this term (Candidate).
    pub leader_id_vote: Option<String>,
}

impl TermState {
    /// Index of the highest log entry known to be committed.
    pub fn last_commit_log_count(&self) -> u64 {
        self.log_entries.len() as u64
    }

    /// Index of the highest log entry applied (committed or not) to this
    /// replica's view of the log.
    pub fn last_applied_log_count(&self) -> u64 {
        (self.log_entries.len() + self.uncommitted_entries.len()) as u64
    }

    /// The entry at `last_applied_log_count - 1`, read across the
    /// conceptual combined sequence (`log_entries` followed by
    /// `uncommitted_entries`). `None` if nothing has been applied yet.
    pub fn last_applied_entry(&self) -> Option<&Entry> {
        let applied = self.last_applied_log_count() as usize;
        if applied == 0 {
            return None;
        }
        let idx = applied - 1;
        if idx < self.log_entries.len() {
            self.log_entries.get(idx)
        } else {
            self.uncommitted_entries.get(idx - self.log_entries.len())
        }
    }
}

/// Majority rule: `N = |other_ids| + 1`, majority is
/// `> floor(N / 2)`. `count` should include the local replica when it is a
/// member of the set being counted (`received_vote_ids` always contains
/// self; `received_put_responses` does not, so callers add one for the
/// leader itself).
pub fn has_quorum(count: usize, other_ids_len: usize) -> bool {
    let n = other_ids_len + 1;
    count > n / 2
}
