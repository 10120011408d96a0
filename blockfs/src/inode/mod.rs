//! The in-memory inode cache: identity, reference counting, locking, and
//! load/store of the on-disk [`blockfs_types::Inode`].
//!
//! Two locks guard each cached inode, acquired in this order: the table's
//! [`crate::sync::SpinLock`] (identity and refcount — find-or-recycle by
//! inode number) and then, only once an [`Inode`] has been turned into a
//! [`TxInode`] and locked, a per-inode [`crate::sync::SleepLock`] (its
//! on-disk content). The table lock is never held across a sleep.
//!
//! An [`Inode`] is a cheap, cloneable handle shared across threads; a
//! [`TxInode`] is the same handle borrowed for one transaction, and a
//! [`LockedTxInode`] additionally holds the content lock and so can read or
//! mutate fields. Dropping the last [`TxInode`] for an unlinked inode
//! (`nlink == 0`) truncates and frees it, transactionally.

pub mod content;
pub mod directory;

use std::sync::Arc;

use block_io::BlockDevice;
use blockfs_types::{self as repr, InodeNo, NUM_DIRECT_REFS};
use dataview::PodMethods as _;

pub use directory::DirInode;

use crate::{FS_BLOCK_SIZE, Fs, journal::Tx, params::NINODE, sync::SleepLock};

type InodeDataPtr = Arc<SleepLock<Option<InodeData>>>;

/// The in-memory copy of an on-disk inode's fields, loaded lazily the first
/// time some transaction locks it.
pub(crate) struct InodeData {
    pub(crate) ty: i16,
    pub(crate) major: i16,
    pub(crate) minor: i16,
    pub(crate) nlink: i16,
    pub(crate) size: u32,
    pub(crate) addrs: [Option<repr::BlockNo>; NUM_DIRECT_REFS + 1],
}

impl InodeData {
    fn from_repr(src: &repr::Inode) -> Self {
        let mut addrs = [None; NUM_DIRECT_REFS + 1];
        src.read_addrs(&mut addrs);
        Self {
            ty: src.ty,
            major: src.major,
            minor: src.minor,
            nlink: src.nlink,
            size: src.size,
            addrs,
        }
    }

    fn write_repr(&self, dst: &mut repr::Inode) {
        dst.ty = self.ty;
        dst.major = self.major;
        dst.minor = self.minor;
        dst.nlink = self.nlink;
        dst.size = self.size;
        dst.write_addrs(&self.addrs);
    }
}

/// One slot of the in-memory inode table: an inode number and the shared
/// handle to its (possibly not-yet-loaded) data.
///
/// Carries no explicit reference count: the entry's own `data` clone plus
/// every live [`Inode`]/[`TxInode`] clone *are* the count, via
/// `Arc::strong_count`. A [`TxInode`] dropping down to `strong_count() == 2`
/// (the entry's clone and its own) means it is the last live handle.
pub(crate) struct InodeEntry {
    inum: InodeNo,
    data: InodeDataPtr,
}

/// A cloneable, thread-shareable handle on an inode.
///
/// Carries no lock by itself; call [`Inode::to_tx`] to borrow it for a
/// transaction before reading or mutating its content.
#[derive(Clone)]
pub struct Inode {
    inum: InodeNo,
    data: InodeDataPtr,
}

impl Inode {
    #[must_use]
    pub fn inum(&self) -> InodeNo {
        self.inum
    }

    /// Borrows this handle for `tx`, returning a [`TxInode`] that can be
    /// locked to read or mutate its content.
    #[must_use]
    pub fn to_tx<'tx, Device, const READ_ONLY: bool>(
        &self,
        tx: &'tx Tx<'tx, Device, READ_ONLY>,
    ) -> TxInode<'tx, Device, READ_ONLY> {
        TxInode {
            tx,
            inum: self.inum,
            data: Arc::clone(&self.data),
        }
    }
}

/// An [`Inode`] borrowed for the lifetime of one transaction.
pub struct TxInode<'tx, Device, const READ_ONLY: bool> {
    tx: &'tx Tx<'tx, Device, READ_ONLY>,
    inum: InodeNo,
    data: InodeDataPtr,
}

impl<'tx, Device, const READ_ONLY: bool> TxInode<'tx, Device, READ_ONLY>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    /// Finds or creates the in-memory table entry for `inum`, without
    /// loading its on-disk content.
    ///
    /// # Panics
    ///
    /// Panics if every table slot is in use by some other inode — the
    /// in-memory table is a fixed-size resource, exhausting it is fatal.
    #[must_use]
    pub fn get(tx: &'tx Tx<'tx, Device, READ_ONLY>, inum: InodeNo) -> Self {
        let mut table = tx.fs.inode_table().lock();

        if let Some(entry) = table.iter_mut().flatten().find(|entry| entry.inum == inum) {
            let data = Arc::clone(&entry.data);
            drop(table);
            return Self { tx, inum, data };
        }

        let slot = table
            .iter_mut()
            .find(|slot| slot.is_none())
            .expect("in-memory inode table exhausted");
        let data = Arc::new(SleepLock::new(None));
        *slot = Some(InodeEntry {
            inum,
            data: Arc::clone(&data),
        });
        drop(table);
        Self { tx, inum, data }
    }

    #[must_use]
    pub fn inum(&self) -> InodeNo {
        self.inum
    }

    /// A cloneable, `Tx`-independent handle on the same inode, e.g. to stash
    /// as a process's working directory across transactions.
    #[must_use]
    pub fn handle(&self) -> Inode {
        Inode {
            inum: self.inum,
            data: Arc::clone(&self.data),
        }
    }

    /// Locks the inode's content, loading it from disk on first access.
    ///
    /// # Panics
    ///
    /// Panics if the on-disk type of a freshly loaded inode is `0` — it was
    /// never allocated, or its table entry outlived a free.
    #[must_use]
    pub fn lock<'i>(&'i mut self) -> LockedTxInode<'tx, 'i, Device, READ_ONLY> {
        LockedTxInode::new(self.tx, self.inum, &self.data, self.data.lock())
    }

    /// Attempts to lock the inode's content without blocking.
    pub fn try_lock<'i>(&'i mut self) -> Result<LockedTxInode<'tx, 'i, Device, READ_ONLY>, ()> {
        let locked = self.data.try_lock()?;
        Ok(LockedTxInode::new(self.tx, self.inum, &self.data, locked))
    }
}

impl<'tx, Device> TxInode<'tx, Device, false>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    /// Allocates a fresh on-disk inode of type `ty` and returns a handle on
    /// it.
    ///
    /// # Panics
    ///
    /// Panics if every on-disk inode is in use — resource exhaustion is
    /// fatal here, matching [`Fs::alloc_block`](crate::Fs::alloc_block).
    #[must_use]
    pub fn alloc(tx: &'tx Tx<'tx, Device, false>, ty: i16) -> Self {
        let inum = alloc_inum(tx, ty);
        Self::get(tx, inum)
    }
}

fn alloc_inum<Device>(tx: &Tx<'_, Device, false>, ty: i16) -> InodeNo
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    let sb = tx.fs.super_block();
    for raw in 1..sb.ninodes {
        let inum = InodeNo::new(raw);
        let mut br = tx.fs.get_block(tx, sb.inode_block(inum));
        let Ok(mut bg) = br.lock().read() else {
            unreachable!("block device read is treated as infallible")
        };
        let disk_ip = bg.data_mut::<repr::InodeBlock>().inode_mut(inum);
        if disk_ip.is_free() {
            disk_ip.allocate(ty);
            tx.fs.log_write(&mut bg);
            return inum;
        }
    }
    panic!("out of inodes");
}

impl<Device, const READ_ONLY: bool> Drop for TxInode<'_, Device, READ_ONLY>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    fn drop(&mut self) {
        // Held across the strong-count check so no other thread can clone a
        // new handle out of this table entry between the check and the
        // decision to free.
        let table = self.tx.fs.inode_table().lock();
        let Some(slot_idx) = table
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|e| e.inum == self.inum))
        else {
            unreachable!("inode handle outlived its table entry");
        };

        if Arc::strong_count(&self.data) > 2 {
            return;
        }

        // strong_count == 2: the table entry's own clone and this one, and
        // nothing else — no other in-memory handle can be holding the
        // content lock, so this won't block.
        let Ok(locked) = self.data.try_lock() else {
            return;
        };
        if locked.as_ref().map_or(true, |d| d.nlink > 0) {
            return;
        }
        drop(table);

        // Last in-memory reference to an unlinked inode: its blocks must be
        // freed before the table slot can be recycled for a different inode
        // number.
        if let Some(tx) = self.tx.to_writable() {
            let mut lip = LockedTxInode {
                tx,
                inum: self.inum,
                locked,
            };
            lip.truncate();
            lip.free();
        }

        let mut table = self.tx.fs.inode_table().lock();
        table[slot_idx] = None;
    }
}

/// A [`TxInode`] with its content lock held: the only way to read or mutate
/// an inode's fields.
pub struct LockedTxInode<'tx, 'i, Device, const READ_ONLY: bool> {
    tx: &'tx Tx<'tx, Device, READ_ONLY>,
    inum: InodeNo,
    locked: crate::sync::SleepLockGuard<'i, Option<InodeData>>,
}

impl<'tx, 'i, Device, const READ_ONLY: bool> LockedTxInode<'tx, 'i, Device, READ_ONLY>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    fn new(
        tx: &'tx Tx<'tx, Device, READ_ONLY>,
        inum: InodeNo,
        _data: &InodeDataPtr,
        mut locked: crate::sync::SleepLockGuard<'i, Option<InodeData>>,
    ) -> Self {
        if locked.is_none() {
            let sb = tx.fs.super_block();
            let mut br = tx.fs.get_block(tx, sb.inode_block(inum));
            let Ok(bg) = br.lock().read() else {
                unreachable!("block device read is treated as infallible")
            };
            let disk_ip = bg.data::<repr::InodeBlock>().inode(inum);
            assert!(!disk_ip.is_free(), "loaded inode has on-disk type 0");
            *locked = Some(InodeData::from_repr(disk_ip));
        }
        Self { tx, inum, locked }
    }

    fn data(&self) -> &InodeData {
        self.locked.as_ref().expect("inode content not loaded")
    }

    #[must_use]
    pub fn inum(&self) -> InodeNo {
        self.inum
    }

    #[must_use]
    pub fn ty(&self) -> i16 {
        self.data().ty
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.ty() == repr::T_DIR
    }

    #[must_use]
    pub fn is_device(&self) -> bool {
        self.ty() == repr::T_DEVICE
    }

    #[must_use]
    pub fn nlink(&self) -> i16 {
        self.data().nlink
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.data().size
    }

    #[must_use]
    pub fn stat(&self) -> crate::stat::Stat {
        crate::stat::Stat {
            ino: self.inum,
            ty: self.ty(),
            nlink: self.nlink(),
            size: u64::from(self.size()),
        }
    }
}

impl<Device> LockedTxInode<'_, '_, Device, false>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    fn data_mut(&mut self) -> &mut InodeData {
        self.locked.as_mut().expect("inode content not loaded")
    }

    pub fn set_nlink(&mut self, nlink: i16) {
        self.data_mut().nlink = nlink;
        self.update();
    }

    pub fn incr_nlink(&mut self) {
        self.data_mut().nlink += 1;
        self.update();
    }

    pub fn decr_nlink(&mut self) {
        self.data_mut().nlink -= 1;
        self.update();
    }

    pub fn set_device(&mut self, major: i16, minor: i16) {
        self.data_mut().major = major;
        self.data_mut().minor = minor;
        self.update();
    }

    /// Writes the in-memory copy of this inode's fields back to disk.
    ///
    /// Called after every mutation to its fixed-size fields (`nlink`,
    /// `size`, `addrs`); content data itself is written separately by
    /// [`content::write`](Self::write).
    pub(crate) fn update(&mut self) {
        let sb = self.tx.fs.super_block();
        let inum = self.inum;
        let mut br = self.tx.fs.get_block(self.tx, sb.inode_block(inum));
        let Ok(mut bg) = br.lock().read() else {
            unreachable!("block device read is treated as infallible")
        };
        self.locked
            .as_ref()
            .expect("inode content not loaded")
            .write_repr(bg.data_mut::<repr::InodeBlock>().inode_mut(inum));
        self.tx.fs.log_write(&mut bg);
    }
}
