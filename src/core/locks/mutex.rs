use crate::core::locks::next_lock_id;
use crate::core::runtime;
use crate::core::types::MutexId;
use parking_lot::{Mutex as ParkingLotMutex, MutexGuard as ParkingLotMutexGuard};
use std::ops::{Deref, DerefMut};

/// A mutex whose acquisitions feed the process-wide lock-order detector
///
/// Behaves like a `parking_lot::Mutex`; in addition, every lock and unlock is
/// reported so that inconsistent lock orders are flagged even when they
/// never actually deadlock.
///
/// # Example
///
/// ```rust
/// use lockgraph::Mutex;
///
/// let mutex = Mutex::new(42);
/// {
///     let mut guard = mutex.lock();
///     *guard += 1;
/// } // released here
/// assert_eq!(*mutex.lock(), 43);
/// ```
pub struct Mutex<T> {
    id: MutexId,
    inner: ParkingLotMutex<T>,
}

/// Guard for a [`Mutex`], reports the release when dropped
pub struct MutexGuard<'a, T> {
    lock_id: MutexId,
    guard: ParkingLotMutexGuard<'a, T>,
}

impl<T> Mutex<T> {
    /// Create a new tracked mutex
    ///
    /// The detector learns about it on first lock.
    pub fn new(value: T) -> Self {
        Mutex {
            id: next_lock_id(),
            inner: ParkingLotMutex::new(value),
        }
    }

    /// Identity of this mutex in the lock-order graph
    pub fn id(&self) -> MutexId {
        self.id
    }

    /// Acquire the lock, blocking until it is available
    ///
    /// The lock-order check runs before blocking, so an inversion is reported
    /// even if this call is about to deadlock.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        runtime::before_lock(self.id, true);
        let guard = self.inner.lock();
        runtime::after_lock(self.id, true, false);
        MutexGuard {
            lock_id: self.id,
            guard,
        }
    }

    /// Try to acquire the lock without blocking
    ///
    /// A successful try-lock is tracked as held but never creates an ordering
    /// into this mutex; a failed one is not reported at all.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lockgraph::Mutex;
    ///
    /// let mutex = Mutex::new(1);
    /// let held = mutex.lock();
    /// assert!(mutex.try_lock().is_none());
    /// drop(held);
    /// assert!(mutex.try_lock().is_some());
    /// ```
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let guard = self.inner.try_lock()?;
        runtime::after_lock(self.id, true, true);
        Some(MutexGuard {
            lock_id: self.id,
            guard,
        })
    }

    /// Returns a mutable reference to the underlying data
    ///
    /// The mutable borrow guarantees no lock is held, so nothing is reported.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T> Drop for Mutex<T> {
    fn drop(&mut self) {
        runtime::destroy(self.id);
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.guard.deref()
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guard.deref_mut()
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        runtime::before_unlock(self.lock_id, true);
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Mutex<T> {
        Mutex::new(Default::default())
    }
}

impl<T> From<T> for Mutex<T> {
    fn from(t: T) -> Self {
        Mutex::new(t)
    }
}
