//! A tracked reader-writer lock
//!
//! Read and write acquisitions feed the lock-order graph alike: holding any
//! mode of `A` while acquiring any mode of `B` records `A -> B`. Recursive
//! read locking is allowed and tracked as a nested entry.
//!
//! # Example
//!
//! ```rust
//! use lockgraph::RwLock;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let lock = Arc::new(RwLock::new(10));
//! let reader = Arc::clone(&lock);
//!
//! thread::spawn(move || {
//!     let data = reader.read();
//!     assert!(*data >= 10);
//! })
//! .join()
//! .unwrap();
//!
//! *lock.write() += 1;
//! assert_eq!(*lock.read(), 11);
//! ```

use crate::core::locks::next_lock_id;
use crate::core::runtime;
use crate::core::types::MutexId;
use parking_lot::{
    RwLock as ParkingLotRwLock, RwLockReadGuard as ParkingLotReadGuard,
    RwLockWriteGuard as ParkingLotWriteGuard,
};
use std::ops::{Deref, DerefMut};

/// A reader-writer lock whose acquisitions feed the lock-order detector
pub struct RwLock<T> {
    id: MutexId,
    inner: ParkingLotRwLock<T>,
}

/// Guard for a shared (read) lock, reports the release when dropped
pub struct RwLockReadGuard<'a, T> {
    lock_id: MutexId,
    guard: ParkingLotReadGuard<'a, T>,
}

/// Guard for an exclusive (write) lock, reports the release when dropped
pub struct RwLockWriteGuard<'a, T> {
    lock_id: MutexId,
    guard: ParkingLotWriteGuard<'a, T>,
}

impl<T> RwLock<T> {
    pub fn new(value: T) -> Self {
        RwLock {
            id: next_lock_id(),
            inner: ParkingLotRwLock::new(value),
        }
    }

    /// Identity of this lock in the lock-order graph
    pub fn id(&self) -> MutexId {
        self.id
    }

    /// Acquire a shared lock
    ///
    /// Uses `read_recursive` so a thread already holding a read lock does not
    /// block behind a queued writer.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        runtime::before_lock(self.id, false);
        let guard = self.inner.read_recursive();
        runtime::after_lock(self.id, false, false);
        RwLockReadGuard {
            lock_id: self.id,
            guard,
        }
    }

    /// Acquire an exclusive lock
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        runtime::before_lock(self.id, true);
        let guard = self.inner.write();
        runtime::after_lock(self.id, true, false);
        RwLockWriteGuard {
            lock_id: self.id,
            guard,
        }
    }

    /// Try to acquire a shared lock without blocking
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        let guard = self.inner.try_read_recursive()?;
        runtime::after_lock(self.id, false, true);
        Some(RwLockReadGuard {
            lock_id: self.id,
            guard,
        })
    }

    /// Try to acquire an exclusive lock without blocking
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        let guard = self.inner.try_write()?;
        runtime::after_lock(self.id, true, true);
        Some(RwLockWriteGuard {
            lock_id: self.id,
            guard,
        })
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T> Drop for RwLock<T> {
    fn drop(&mut self) {
        runtime::destroy(self.id);
    }
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        runtime::before_unlock(self.lock_id, false);
    }
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        runtime::before_unlock(self.lock_id, true);
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> RwLock<T> {
        RwLock::new(Default::default())
    }
}

impl<T> From<T> for RwLock<T> {
    fn from(t: T) -> Self {
        RwLock::new(t)
    }
}
