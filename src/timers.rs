//! Randomized election timeout and the fixed heartbeat/batching cadences.

use std::time::Duration;

use rand::Rng;

/// Election timeout is drawn uniformly from `[150, 300)` ms in 5 ms steps,
/// then divided by this multiplier. Production default is `1` (the raw
/// spec'd millisecond range); set higher to slow the cluster down for
/// manual observation, as the original implementation's debug tooling did.
pub const DEBUG_TIMEOUT_MULTIPLIER: u32 = 1;

const ELECTION_TIMEOUT_MIN_MS: u64 = 150;
const ELECTION_TIMEOUT_MAX_MS: u64 = 300;
const ELECTION_TIMEOUT_STEP_MS: u64 = 5;

/// Leader heartbeat cadence when there are no uncommitted entries to batch.
pub const LEADER_HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(70);

/// How long a leader waits before flushing a non-empty, non-full batch of
/// uncommitted entries.
pub const UNCOMMITTED_LOG_TIMEOUT: Duration = Duration::from_millis(15);

/// Uncommitted batch size that forces an immediate flush.
pub const MAX_UNCOMMITTED_LOG_COUNT: usize = 5;

/// Floor for every computed timeout so the event loop never busy-spins.
pub const IMMEDIATE_TIMEOUT: Duration = Duration::from_micros(100);

/// Draw a fresh randomized election timeout. Called once at replica startup
/// and again every time a replica (re)enters the Follower or Candidate role.
pub fn generate_election_timeout() -> Duration {
    let steps = (ELECTION_TIMEOUT_MAX_MS - ELECTION_TIMEOUT_MIN_MS) / ELECTION_TIMEOUT_STEP_MS;
    let step = rand::thread_rng().gen_range(0..steps);
    let millis = (ELECTION_TIMEOUT_MIN_MS + step * ELECTION_TIMEOUT_STEP_MS) / DEBUG_TIMEOUT_MULTIPLIER as u64;
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn election_timeout_is_within_configured_range() {
        for _ in 0..200 {
            let timeout = generate_election_timeout();
            assert!(timeout >= Duration::from_millis(ELECTION_TIMEOUT_MIN_MS));
            assert!(timeout < Duration::from_millis(ELECTION_TIMEOUT_MAX_MS));
        }
    }
}
