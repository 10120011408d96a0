//! Synchronization primitives.
//!
//! Two flavors, mirroring the two-tier locking discipline the inode cache and
//! log rely on: a [`SleepLock`] that blocks the calling thread until the lock
//! is available, and a [`SpinLock`] that busy-waits. Neither disables
//! interrupts or pins a CPU id the way a kernel's would — there are no
//! interrupts to disable above a synchronous block device — but the *shape*
//! callers rely on is preserved: a `SpinLock` critical section must be short
//! and never block, while a `SleepLock` critical section may.

use std::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::{Condvar, Mutex as StdMutex},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

/// A lock that parks the calling thread while the lock is held elsewhere.
pub struct SleepLock<T> {
    locked: StdMutex<bool>,
    cond: Condvar,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SleepLock<T> {}
unsafe impl<T: Send> Send for SleepLock<T> {}

pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
}

impl<T> SleepLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: StdMutex::new(false),
            cond: Condvar::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, blocking the caller until it is available.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let mut locked = self.locked.lock().unwrap();
        while *locked {
            locked = self.cond.wait(locked).unwrap();
        }
        *locked = true;
        SleepLockGuard { lock: self }
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// Returns `Err(())` if it is already held.
    pub fn try_lock(&self) -> Result<SleepLockGuard<'_, T>, ()> {
        let mut locked = self.locked.lock().unwrap();
        if *locked {
            return Err(());
        }
        *locked = true;
        Ok(SleepLockGuard { lock: self })
    }
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        let mut locked = self.lock.locked.lock().unwrap();
        *locked = false;
        self.lock.cond.notify_one();
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> mutex_api::Mutex for SleepLock<T> {
    type Data = T;
    type Guard<'a>
        = SleepLockGuard<'a, T>
    where
        Self: 'a;

    fn new(data: Self::Data) -> Self {
        Self::new(data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

/// A lock that busy-waits. Critical sections must be short: no disk I/O, no
/// blocking on a [`SleepLock`], no allocation failure path that panics with
/// the lock held.
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        SpinLockGuard { lock: self }
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> mutex_api::Mutex for SpinLock<T> {
    type Data = T;
    type Guard<'a>
        = SpinLockGuard<'a, T>
    where
        Self: 'a;

    fn new(data: Self::Data) -> Self {
        Self::new(data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

/// A condition variable for use alongside a [`SpinLock`].
///
/// Waiting drops the held guard and re-acquires it before returning, exactly
/// like `std::sync::Condvar`, but without requiring a `SleepLock`-style OS
/// parking primitive underneath — a generation counter plus cooperative
/// yielding is enough for the log's "wait for commit" use.
pub struct SpinLockCondVar {
    generation: AtomicU64,
}

impl SpinLockCondVar {
    pub const fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
        }
    }

    pub fn wait<'a, T>(&self, guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
        let lock = guard.lock;
        let seen = self.generation.load(Ordering::Relaxed);
        drop(guard);
        while seen == self.generation.load(Ordering::Relaxed) {
            std::thread::yield_now();
        }
        lock.lock()
    }

    pub fn notify(&self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for SpinLockCondVar {
    fn default() -> Self {
        Self::new()
    }
}
