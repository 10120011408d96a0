//! A synchronization primitive which can be written to only once.
#![cfg_attr(not(test), no_std)]

use core::{
    cell::UnsafeCell,
    error::Error,
    fmt,
    mem::MaybeUninit,
    sync::atomic::{AtomicBool, Ordering},
};

use dataview::Pod;

/// A synchronization primitive which can be written to only once.
pub struct OnceInit<T> {
    initialized: AtomicBool,
    value: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T> Sync for OnceInit<T> where T: Send {}

impl<T> Default for OnceInit<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for OnceInit<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("OnceInit");
        if let Ok(value) = self.try_get() {
            f.field(&value);
        } else {
            f.field(&format_args!("<uninit>"));
        };
        f.finish()
    }
}

impl<T> OnceInit<T> {
    /// Creates a new uninitialized cell.
    pub const fn new() -> Self {
        Self {
            initialized: AtomicBool::new(false),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Initializes the cell.
    ///
    /// Returns `Err(value)` if the cell is already initialized.
    pub fn try_init(&self, value: T) -> Result<(), T> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(value);
        }

        unsafe {
            (*self.value.get()).write(value);
        }

        Ok(())
    }

    /// Initializes the cell by reference, avoiding a stack copy of `T`.
    ///
    /// Returns `Err` if the cell is already initialized.
    pub fn try_init_by_ref(&self, value: &T) -> Result<(), InitError>
    where
        T: Pod,
    {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(InitError::AlreadyInitialized);
        }

        unsafe {
            (*self.value.get()).as_mut_ptr().copy_from(value, 1);
        }

        Ok(())
    }

    /// Initializes the cell.
    ///
    /// # Panics
    ///
    /// Panics if the cell is already initialized.
    pub fn init(&self, value: T) {
        if self.try_init(value).is_err() {
            panic!("OnceInit should be initialized at most once");
        }
    }

    /// Initializes the cell by reference, avoiding a stack copy of `T`.
    ///
    /// # Panics
    ///
    /// Panics if the cell is already initialized.
    pub fn init_by_ref(&self, value: &T)
    where
        T: Pod,
    {
        if self.try_init_by_ref(value).is_err() {
            panic!("OnceInit should be initialized at most once");
        }
    }

    /// Gets the contents of the cell.
    ///
    /// # Panics
    ///
    /// Panics if the cell is not yet initialized.
    pub fn get(&self) -> &T {
        self.try_get()
            .expect("OnceInit should be initialized before get")
    }

    /// Gets the contents of the cell, or `Err` if not yet initialized.
    pub fn try_get(&self) -> Result<&T, GetError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(GetError::NotInitialized);
        }

        Ok(unsafe { (*self.value.get()).assume_init_ref() })
    }
}

impl<T> Drop for OnceInit<T> {
    fn drop(&mut self) {
        if self.initialized.load(Ordering::Acquire) {
            unsafe {
                (*self.value.get()).assume_init_drop();
            }
        }
    }
}

/// An error from [`OnceInit`] initialize functions.
#[derive(Debug)]
pub enum InitError {
    AlreadyInitialized,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::AlreadyInitialized => fmt::Display::fmt("already initialized", f),
        }
    }
}

impl Error for InitError {}

/// An error from [`OnceInit`] get functions.
#[derive(Debug)]
pub enum GetError {
    NotInitialized,
}

impl fmt::Display for GetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GetError::NotInitialized => fmt::Display::fmt("not initialized", f),
        }
    }
}

impl Error for GetError {}
