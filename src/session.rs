//! Optional per-peer TLS session cache (feature = `"tls"`).
//!
//! This interlocks with the same locking discipline as peer selection, which
//! is why it lives in this crate rather than the connection layer that
//! actually owns the TLS handshake: `set_session` copies the cached blob out
//! under the peer's session lock and hands an owned copy to the caller (who
//! deserializes it into whatever the TLS library wants); `save_session`
//! receives a serialized blob from the caller and stores it, growing the
//! slot through a slab allocator mutex if the pool is shared and the new
//! blob does not fit.

use parking_lot::Mutex;

use crate::error::AllocError;

/// Models the shared-memory slab allocator's allocate/free mutex. Tracks
/// remaining capacity rather than reproducing nginx's free-list bookkeeping
/// byte-for-byte.
pub struct SlabAllocator {
    capacity: usize,
    used: Mutex<usize>,
}

impl SlabAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: Mutex::new(0),
        }
    }

    fn try_grow(&self, additional: usize) -> Result<(), AllocError> {
        let mut used = self.used.lock();
        if *used + additional > self.capacity {
            return Err(AllocError::SlabExhausted {
                requested: additional,
                capacity: self.capacity,
            });
        }
        *used += additional;
        Ok(())
    }

    fn shrink(&self, amount: usize) {
        let mut used = self.used.lock();
        *used = used.saturating_sub(amount);
    }
}

/// Per-peer TLS session storage. `Local` swaps the cached blob directly
/// (process-local pools, the general case); `Shared` additionally grows its
/// slot through a [`SlabAllocator`] shared across the whole pool, matching
/// nginx's `ngx_http_upstream_save_round_robin_peer_session`.
#[derive(Debug)]
pub enum SessionSlot {
    Local(arc_swap::ArcSwapOption<Vec<u8>>),
    Shared(Mutex<Vec<u8>>),
}

impl SessionSlot {
    pub fn local() -> Self {
        SessionSlot::Local(arc_swap::ArcSwapOption::from(None))
    }

    pub fn shared() -> Self {
        SessionSlot::Shared(Mutex::new(Vec::new()))
    }

    /// Copies the cached blob out, or `None` if nothing is cached.
    pub fn load(&self) -> Option<Vec<u8>> {
        match self {
            SessionSlot::Local(slot) => slot.load_full().map(|arc| (*arc).clone()),
            SessionSlot::Shared(slot) => {
                let blob = slot.lock();
                if blob.is_empty() {
                    None
                } else {
                    Some(blob.clone())
                }
            }
        }
    }

    /// Stores `blob`. Blobs larger than `max_size` are dropped (not cached),
    /// matching the "do not cache too big session" rule.
    pub fn save(
        &self,
        blob: Vec<u8>,
        max_size: usize,
        slab: Option<&SlabAllocator>,
    ) -> Result<(), AllocError> {
        if blob.len() > max_size {
            return Ok(());
        }
        match self {
            SessionSlot::Local(slot) => {
                // The old session, if any, is dropped here once its last
                // reader goes away (the swap is the "free" in the source).
                slot.store(Some(std::sync::Arc::new(blob)));
                Ok(())
            }
            SessionSlot::Shared(slot) => {
                let mut current = slot.lock();
                if blob.len() > current.len() {
                    if let Some(slab) = slab {
                        slab.try_grow(blob.len() - current.len())?;
                    }
                }
                *current = blob;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_slot_round_trips() {
        let slot = SessionSlot::local();
        assert!(slot.load().is_none());
        slot.save(vec![1, 2, 3], 16, None).unwrap();
        assert_eq!(slot.load(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn oversized_blob_is_dropped_not_cached() {
        let slot = SessionSlot::local();
        slot.save(vec![0u8; 32], 16, None).unwrap();
        assert!(slot.load().is_none());
    }

    #[test]
    fn shared_slot_grows_through_slab_allocator() {
        let slab = SlabAllocator::new(8);
        let slot = SessionSlot::shared();
        slot.save(vec![1, 2, 3, 4], 16, Some(&slab)).unwrap();
        assert_eq!(slot.load(), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn shared_slot_respects_slab_capacity() {
        let slab = SlabAllocator::new(2);
        let slot = SessionSlot::shared();
        let err = slot.save(vec![1, 2, 3, 4], 16, Some(&slab)).unwrap_err();
        assert!(matches!(err, AllocError::SlabExhausted { .. }));
    }

    #[test]
    fn shrink_releases_capacity_for_reuse() {
        let slab = SlabAllocator::new(4);
        slab.try_grow(4).unwrap();
        assert!(slab.try_grow(1).is_err());
        slab.shrink(4);
        assert!(slab.try_grow(1).is_ok());
    }
}
