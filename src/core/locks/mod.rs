pub mod mutex;
pub mod rwlock;

use crate::core::types::MutexId;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_LOCK_ID: AtomicUsize = AtomicUsize::new(1);

// User-space addresses never have the top bit set, so wrapper ids cannot
// collide with address-derived identities reported through the C ABI.
const WRAPPER_ID_TAG: MutexId = 1 << (usize::BITS - 1);

/// Allocate an identity for a tracked lock wrapper
pub(crate) fn next_lock_id() -> MutexId {
    NEXT_LOCK_ID.fetch_add(1, Ordering::SeqCst) | WRAPPER_ID_TAG
}
