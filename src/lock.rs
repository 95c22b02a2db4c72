//! Locking discipline for a [`crate::pool::Pool`].
//!
//! Process-local balancers typically just wrap their shared state in a plain
//! `parking_lot::RwLock`. This core additionally needs to
//! model the case where the same `Pool` is memory-mapped across worker
//! *processes*, where an `RwLock` built on futex syscalls is unavailable and
//! the wire-compatible primitive is a spinlock over a shared atomic.
//!
//! [`PoolLock`] picks one of the two forms once, at `Pool` construction, and
//! from then on the call sites (`Selector::get`/`release`) don't care which
//! one they're holding. In the single-process case these degrade to a no-op
//! `RwLock`; contracts hold either way.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A read/write lock that is either a genuine `parking_lot::RwLock` (process
/// local) or a spinlock over a shared atomic (models a pool living in
/// cross-process shared memory).
pub enum PoolLock<T> {
    Local(RwLock<T>),
    Shared(SpinRwLock<T>),
}

impl<T> PoolLock<T> {
    pub fn local(value: T) -> Self {
        Self::Local(RwLock::new(value))
    }

    pub fn shared(value: T) -> Self {
        Self::Shared(SpinRwLock::new(value))
    }

    pub fn read(&self) -> PoolReadGuard<'_, T> {
        match self {
            Self::Local(lock) => PoolReadGuard::Local(lock.read()),
            Self::Shared(lock) => PoolReadGuard::Shared(lock.read()),
        }
    }

    pub fn write(&self) -> PoolWriteGuard<'_, T> {
        match self {
            Self::Local(lock) => PoolWriteGuard::Local(lock.write()),
            Self::Shared(lock) => PoolWriteGuard::Shared(lock.write()),
        }
    }
}

pub enum PoolReadGuard<'a, T> {
    Local(RwLockReadGuard<'a, T>),
    Shared(SpinGuard<'a, T>),
}

impl<T> std::ops::Deref for PoolReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        match self {
            Self::Local(g) => g,
            Self::Shared(g) => g,
        }
    }
}

pub enum PoolWriteGuard<'a, T> {
    Local(RwLockWriteGuard<'a, T>),
    Shared(SpinGuard<'a, T>),
}

impl<T> std::ops::Deref for PoolWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        match self {
            Self::Local(g) => g,
            Self::Shared(g) => g,
        }
    }
}

impl<T> std::ops::DerefMut for PoolWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match self {
            Self::Local(g) => g,
            Self::Shared(g) => g,
        }
    }
}

/// A spinlock-backed lock, standing in for the shared-memory mutex nginx
/// implements over `ngx_shmtx_t`. There is no separate concurrent-reader
/// fast path here — both `read` and `write` spin for exclusive access —
/// since the point is to demonstrate the lock boundary used by
/// `Selector::get`/`release`, not to out-perform a futex.
pub struct SpinRwLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinRwLock<T> {}
unsafe impl<T: Send> Sync for SpinRwLock<T> {}

impl<T> SpinRwLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    fn acquire(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    pub fn read(&self) -> SpinGuard<'_, T> {
        self.acquire();
        SpinGuard { lock: self }
    }

    pub fn write(&self) -> SpinGuard<'_, T> {
        self.acquire();
        SpinGuard { lock: self }
    }
}

pub struct SpinGuard<'a, T> {
    lock: &'a SpinRwLock<T>,
}

impl<T> std::ops::Deref for SpinGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> std::ops::DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
