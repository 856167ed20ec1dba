//! L2: the sortable `YYYYMMDD-HHMMSS-NNNN` message id allocator.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, Ordering};

/// Process-wide monotone counter, modulo 10 000, per §4.2.
static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Number of times the store retries id generation on an exclusive-create
/// collision before giving up (§4.2, §7).
pub const MAX_ID_RETRIES: u32 = 10;

/// `format(now, "YYYYMMDD-HHMMSS") + "-" + zero_padded_4(counter)`.
pub fn next_id(now: DateTime<Utc>) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed) % 10_000;
    format!("{}-{:04}", now.format("%Y%m%d-%H%M%S"), n)
}

/// Test-only: reset the process-wide counter so tests don't depend on
/// execution order. Never called from production code (§9 design note).
#[cfg(test)]
pub(crate) fn reset_for_test() {
    COUNTER.store(0, Ordering::Relaxed);
}
