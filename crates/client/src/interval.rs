//! Jittered wait intervals
//!
//! Every periodic wait in the client is jittered so that a fleet
//! booting at the same moment does not hammer the server in lockstep.

use std::time::Duration;

use rand::Rng;

/// A duration within ±10% of `base`, uniformly distributed.
///
/// The jitter range is a fifth of the base, centered on it. A base too
/// small to jitter is returned as-is.
#[must_use]
pub fn jittered(base: Duration) -> Duration {
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let range_ms = base_ms / 5;
    if range_ms == 0 {
        return base;
    }
    let offset = rand::rng().random_range(0..range_ms);
    Duration::from_millis(base_ms - range_ms / 2 + offset)
}
