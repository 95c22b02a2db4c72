//! Per-request selection context.

use std::sync::Arc;

use crate::error::AllocError;
use crate::pool::Pool;

const WORD_BITS: usize = usize::BITS as usize;

/// The "already tried" bitmap for one request.
///
/// Represented inline (a single `usize`) when the pool is small enough to
/// fit, falling back to a heap-allocated word vector otherwise. This mirrors
/// the optimization the source takes to avoid a per-request allocation for
/// the common case of a handful of peers — it is an optimization, not part
/// of the contract, so both representations behave identically from the
/// caller's point of view.
enum TriedSet {
    Inline(usize),
    Heap(Vec<usize>),
}

impl TriedSet {
    fn new(len: usize) -> Self {
        if len <= WORD_BITS {
            TriedSet::Inline(0)
        } else {
            let words = len.div_ceil(WORD_BITS);
            TriedSet::Heap(vec![0; words])
        }
    }

    fn is_set(&self, i: usize) -> bool {
        match self {
            TriedSet::Inline(bits) => bits & (1usize << (i % WORD_BITS)) != 0,
            TriedSet::Heap(words) => words[i / WORD_BITS] & (1usize << (i % WORD_BITS)) != 0,
        }
    }

    fn set(&mut self, i: usize) {
        match self {
            TriedSet::Inline(bits) => *bits |= 1usize << (i % WORD_BITS),
            TriedSet::Heap(words) => words[i / WORD_BITS] |= 1usize << (i % WORD_BITS),
        }
    }

    /// Reinterprets the bitmap against a pool of `len` peers, zeroing all of
    /// its bits — used when falling back from the primary pool to the
    /// backup pool mid-request.
    fn reset(&mut self, len: usize) {
        *self = TriedSet::new(len);
    }
}

/// Per-request selection state: which pool is currently being searched
/// (primary, or backup after a fallback), which peer was handed out most
/// recently, and the tried-set bitmap.
pub struct RequestState {
    pub(crate) pool: Arc<Pool>,
    pub(crate) current: Option<usize>,
    tried: TriedSet,
    tries_remaining: usize,
}

impl RequestState {
    /// Allocates a fresh request context against `pool` (the primary pool
    /// for this upstream). The tried-set is sized to the larger of the
    /// primary and backup pool so it never needs resizing when falling back.
    pub fn new(pool: Arc<Pool>) -> Result<Self, AllocError> {
        let primary_len = pool.number();
        let backup_len = pool.backup.as_ref().map(|b| b.number()).unwrap_or(0);
        let len = primary_len.max(backup_len);

        Ok(Self {
            tries_remaining: pool.total_tries(),
            pool,
            current: None,
            tried: TriedSet::new(len),
        })
    }

    pub(crate) fn is_tried(&self, i: usize) -> bool {
        self.tried.is_set(i)
    }

    pub(crate) fn mark_tried(&mut self, i: usize) {
        self.tried.set(i);
    }

    pub(crate) fn fallback_to_backup(&mut self, backup: Arc<Pool>) {
        let len = backup.number();
        self.tried.reset(len);
        self.pool = backup;
    }

    /// The retry driver consults this to bound total attempts.
    pub fn remaining_tries(&self) -> usize {
        self.tries_remaining
    }

    pub(crate) fn decrement_tries(&mut self) {
        if self.tries_remaining > 0 {
            self.tries_remaining -= 1;
        }
    }

    pub(crate) fn force_exhausted(&mut self) {
        self.tries_remaining = 0;
    }
}

impl Drop for RequestState {
    /// Pairing every `get` with a `release` is the caller's responsibility;
    /// this surfaces a violation during development instead of silently
    /// leaking a `conns` increment.
    fn drop(&mut self) {
        if let Some(idx) = self.current {
            tracing::warn!(
                upstream = %self.pool.name,
                peer_index = idx,
                "RequestState dropped with an unreleased peer"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Pool, ServerSpec};

    fn build_pool(n: usize) -> Arc<Pool> {
        let specs = vec![ServerSpec {
            name: "a".into(),
            addresses: (0..n)
                .map(|i| format!("127.0.0.1:{}", 8000 + i).parse::<std::net::SocketAddr>().unwrap().into())
                .collect(),
            weight: 1,
            max_conns: 0,
            max_fails: 1,
            fail_timeout: 10,
            down: false,
            backup: false,
        }];
        Pool::build("up", &specs, false).unwrap()
    }

    #[test]
    fn inline_bitmap_tracks_small_pools() {
        let pool = build_pool(4);
        let mut rs = RequestState::new(pool).unwrap();
        assert!(!rs.is_tried(0));
        rs.mark_tried(0);
        assert!(rs.is_tried(0));
        assert!(!rs.is_tried(1));
    }

    #[test]
    fn heap_bitmap_tracks_large_pools() {
        let n = WORD_BITS + 10;
        let pool = build_pool(n);
        let mut rs = RequestState::new(pool).unwrap();
        rs.mark_tried(n - 1);
        assert!(rs.is_tried(n - 1));
        assert!(!rs.is_tried(n - 2));
    }

    #[test]
    fn remaining_tries_reflects_pool_tries() {
        let pool = build_pool(3);
        let rs = RequestState::new(pool).unwrap();
        assert_eq!(rs.remaining_tries(), 3);
    }

    #[test]
    fn decrement_tries_floors_at_zero() {
        let pool = build_pool(1);
        let mut rs = RequestState::new(pool).unwrap();
        rs.decrement_tries();
        assert_eq!(rs.remaining_tries(), 0);
        rs.decrement_tries();
        assert_eq!(rs.remaining_tries(), 0);
    }
}
