//! A minimal mutex trait.
//!
//! Letting the block cache and inode table be generic over this trait means
//! a caller can back them with a spinlock, a sleep-lock, or `std::sync::Mutex`
//! without the cache/table code caring which.
#![cfg_attr(not(test), no_std)]

use core::ops::DerefMut;

/// A mutex guarding a value of type `Data`.
pub trait Mutex {
    /// The type of the data that the mutex protects.
    type Data;

    /// The type of the guard that `lock` returns.
    type Guard<'a>: DerefMut<Target = Self::Data>
    where
        Self: 'a;

    /// Creates a new mutex wrapping `data`.
    fn new(data: Self::Data) -> Self;

    /// Acquires the mutex, blocking the caller until it is available.
    fn lock(&self) -> Self::Guard<'_>;
}
