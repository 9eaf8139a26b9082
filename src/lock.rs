//! Prioritized reader-writer lock.
//!
//! Header organization runs in the high-priority writer class; bulk
//! background jobs take the low-priority class. Readers run concurrently
//! with each other. Low-priority writers queued at the gate yield to every
//! pending high-priority writer, but nothing preempts an in-progress reader
//! or writer.

use std::ops::{Deref, DerefMut};
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, MutexGuard, Notify, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub struct PrioritizedRwLock<T> {
    inner: RwLock<T>,
    /// High-priority writers between arrival and guard release.
    high_pending: AtomicUsize,
    /// Wakes gated low-priority writers when the last high writer leaves.
    low_gate: Notify,
    /// Serializes low-priority writers so at most one sits in the inner
    /// queue; the rest wait at the gate where high writers overtake them.
    low_entry: Mutex<()>,
}

impl<T> PrioritizedRwLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
            high_pending: AtomicUsize::new(0),
            low_gate: Notify::new(),
            low_entry: Mutex::new(()),
        }
    }

    /// Shared read access; concurrent with other readers.
    pub async fn read(&self) -> PrioritizedReadGuard<'_, T> {
        PrioritizedReadGuard {
            guard: self.inner.read().await,
        }
    }

    /// Exclusive access in the high-priority writer class.
    pub async fn write_high(&self) -> PrioritizedWriteGuard<'_, T> {
        let pending = HighPendingToken::register(self);
        let guard = self.inner.write().await;
        PrioritizedWriteGuard {
            guard,
            _entry: None,
            _pending: Some(pending),
        }
    }

    /// Exclusive access in the low-priority writer class. Waits while any
    /// high-priority writer is pending or holding the lock.
    pub async fn write_low(&self) -> PrioritizedWriteGuard<'_, T> {
        let entry = self.low_entry.lock().await;

        loop {
            if self.high_pending.load(Ordering::Acquire) == 0 {
                break;
            }
            let mut notified = pin!(self.low_gate.notified());
            notified.as_mut().enable();
            if self.high_pending.load(Ordering::Acquire) == 0 {
                break;
            }
            notified.await;
        }

        let guard = self.inner.write().await;
        PrioritizedWriteGuard {
            guard,
            _entry: Some(entry),
            _pending: None,
        }
    }
}

/// Counts a high-priority writer as pending from arrival until its guard
/// drops, including early cancellation while still queued.
struct HighPendingToken<'a, T> {
    lock: &'a PrioritizedRwLock<T>,
}

impl<'a, T> HighPendingToken<'a, T> {
    fn register(lock: &'a PrioritizedRwLock<T>) -> Self {
        lock.high_pending.fetch_add(1, Ordering::AcqRel);
        Self { lock }
    }
}

impl<T> Drop for HighPendingToken<'_, T> {
    fn drop(&mut self) {
        if self.lock.high_pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.lock.low_gate.notify_waiters();
        }
    }
}

pub struct PrioritizedReadGuard<'a, T> {
    guard: RwLockReadGuard<'a, T>,
}

impl<T> Deref for PrioritizedReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

pub struct PrioritizedWriteGuard<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    _entry: Option<MutexGuard<'a, ()>>,
    _pending: Option<HighPendingToken<'a, T>>,
}

impl<T> Deref for PrioritizedWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for PrioritizedWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
