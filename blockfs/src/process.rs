//! Collaborators the filesystem core consumes but does not own: the
//! caller's current working directory, and the character-device switch
//! table that device inodes dispatch reads and writes through.

use std::{collections::HashMap, sync::Arc};

use crate::{error::Error, inode::Inode};

/// Exposes a caller's current working directory to path resolution.
///
/// A relative path (one that doesn't start with `/`) resolves against
/// whatever this returns; an absolute path ignores it entirely.
pub trait ProcessContext {
    fn cwd(&self) -> &Inode;
}

/// A minimal `ProcessContext` usable in tests and single-directory callers.
pub struct Cwd(Inode);

impl Cwd {
    #[must_use]
    pub fn new(inode: Inode) -> Self {
        Self(inode)
    }
}

impl ProcessContext for Cwd {
    fn cwd(&self) -> &Inode {
        &self.0
    }
}

/// A character device, dispatched to by major number from a `T_DEVICE` inode.
pub trait CharDevice {
    /// Reads up to `dst.len()` bytes, returning the number actually read.
    fn read(&self, dst: &mut [u8], off: usize) -> Result<usize, Error>;

    /// Writes `src`, returning the number of bytes actually written.
    fn write(&self, src: &[u8], off: usize) -> Result<usize, Error>;
}

/// Maps a device inode's major number to its driver.
#[derive(Default, Clone)]
pub struct DeviceTable {
    drivers: HashMap<i16, Arc<dyn CharDevice + Send + Sync>>,
}

impl DeviceTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, major: i16, driver: Arc<dyn CharDevice + Send + Sync>) {
        self.drivers.insert(major, driver);
    }

    pub fn get(&self, major: i16) -> Result<&(dyn CharDevice + Send + Sync), Error> {
        self.drivers
            .get(&major)
            .map(Arc::as_ref)
            .ok_or(Error::UnsupportedDevice(major))
    }
}
