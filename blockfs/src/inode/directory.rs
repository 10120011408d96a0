//! Directory entries: a directory's content is just a packed array of
//! [`blockfs_types::DirEntry`].

use block_io::BlockDevice;
use blockfs_types::{DirEntry, InodeNo};

use super::{LockedTxInode, TxInode};
use crate::FS_BLOCK_SIZE;

impl<'tx, 'i, Device, const READ_ONLY: bool> LockedTxInode<'tx, 'i, Device, READ_ONLY>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    /// Reinterprets this inode as a directory, if its on-disk type is
    /// `T_DIR`.
    pub fn as_dir<'l>(&'l mut self) -> Option<DirInode<'tx, 'i, 'l, Device, READ_ONLY>> {
        self.is_dir().then_some(DirInode(self))
    }
}

/// A directory-typed, locked inode: [`LockedTxInode`] plus directory-entry
/// operations.
pub struct DirInode<'tx, 'i, 'l, Device, const READ_ONLY: bool>(
    &'l mut LockedTxInode<'tx, 'i, Device, READ_ONLY>,
);

impl<'tx, 'i, 'l, Device, const READ_ONLY: bool> DirInode<'tx, 'i, 'l, Device, READ_ONLY>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    #[must_use]
    pub fn inum(&self) -> InodeNo {
        self.0.inum()
    }

    /// Borrows the underlying locked inode, e.g. to read its `stat`.
    pub fn inner(&mut self) -> &mut LockedTxInode<'tx, 'i, Device, READ_ONLY> {
        self.0
    }

    /// `true` unless this directory holds any entry besides `"."` and
    /// `".."`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let de_size = size_of::<DirEntry>();
        let size = self.0.size() as usize;
        (2 * de_size..size)
            .step_by(de_size)
            .all(|off| self.0.read_as::<DirEntry>(off).inum().is_none())
    }

    /// Looks up `name`, returning the inode it names and the byte offset of
    /// its directory entry.
    #[must_use]
    pub fn lookup(&self, name: &[u8]) -> Option<(TxInode<'tx, Device, READ_ONLY>, usize)> {
        let de_size = size_of::<DirEntry>();
        for off in (0..self.0.size() as usize).step_by(de_size) {
            let de = self.0.read_as::<DirEntry>(off);
            let Some(inum) = de.inum() else { continue };
            if !de.is_same_name(name) {
                continue;
            }
            return Some((TxInode::get(self.0.tx, inum), off));
        }
        None
    }
}

impl<Device> DirInode<'_, '_, '_, Device, false>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    /// Writes a new `name` -> `inum` entry into the first free (or
    /// past-the-end) slot.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::AlreadyExists`] if `name` is already present.
    pub fn link(&mut self, name: &[u8], inum: InodeNo) -> Result<(), crate::Error> {
        if self.lookup(name).is_some() {
            return Err(crate::Error::AlreadyExists);
        }

        let de_size = size_of::<DirEntry>();
        let size = self.0.size() as usize;
        debug_assert_eq!(size % de_size, 0);

        let (mut de, off) = (0..size)
            .step_by(de_size)
            .map(|off| (self.0.read_as::<DirEntry>(off), off))
            .find(|(de, _)| de.inum().is_none())
            .unwrap_or((DirEntry::zeroed(), size));

        de.set_name(name);
        de.set_inum(Some(inum));
        self.0.write_as(&de, off)?;
        Ok(())
    }

    /// Clears the entry at `off`, tombstoning the slot for reuse.
    pub fn unlink_at(&mut self, off: usize) -> Result<(), crate::Error> {
        let mut de = self.0.read_as::<DirEntry>(off);
        de.set_inum(None);
        self.0.write_as(&de, off)?;
        Ok(())
    }
}
