//! A crash-consistent hierarchical filesystem core over a synchronous block
//! device.
//!
//! Five layers, leaves first: the [`block_io`] buffer cache, the
//! write-ahead [`log`], the [`inode`] cache (allocation, locking,
//! load/store, truncate and content indexing), [`inode::directory`]
//! entries, and [`path`] resolution. [`ops`] composes these into the
//! top-level operations (`create`, `unlink`, `link`) a caller invokes.
//!
//! Every mutating operation must run inside a [`journal::Tx`] obtained from
//! [`Fs::begin_op`]; dropping it commits the transaction once no other
//! transaction is outstanding.

pub mod data_block;
pub mod error;
pub mod inode;
pub mod journal;
pub mod ops;
pub mod params;
pub mod path;
pub mod process;
pub mod stat;
pub mod sync;
#[cfg(test)]
mod test_support;

pub use blockfs_types::{
    BITS_PER_BLOCK, BlockNo, DIR_SIZE, FS_BLOCK_SIZE, INODE_PER_BLOCK, InodeNo, MAX_FILE,
    NUM_DIRECT_REFS, NUM_INDIRECT_REFS, SuperBlock, T_DEVICE, T_DIR, T_FILE,
};
pub use error::Error;
pub use params::Params;
pub use process::{CharDevice, Cwd, DeviceTable, ProcessContext};

use std::sync::{Arc, RwLock, RwLockReadGuard};

use block_io::{BlockData, BlockDevice, BlockIoCache, BufferList};
use once_init::OnceInit;

use journal::{LogState, Tx};
use sync::{SleepLock, SpinLock, SpinLockCondVar};

/// The mutex backing each cached block's bytes: blocks the caller while an
/// I/O or copy is in flight on that buffer.
pub type BlockDataMutex = SleepLock<BlockData<FS_BLOCK_SIZE>>;
/// The mutex backing the cache's LRU list: held only for pointer bookkeeping.
pub type BufferListMutex = SpinLock<BufferList<BlockDataMutex>>;

pub type BlockHandle<'a, Device> =
    block_io::BlockHandle<'a, Device, BufferListMutex, BlockDataMutex>;
pub type BlockGuard<'a, 'b, Device, const VALID: bool> =
    block_io::BlockGuard<'a, 'b, Device, BufferListMutex, BlockDataMutex, FS_BLOCK_SIZE, VALID>;

/// A mounted filesystem over `Device`.
///
/// Owns the block cache, the superblock (read once at [`Fs::mount`]), the
/// log's in-memory state, the in-memory inode table, and the character
/// device switch table. Every method that touches the disk takes a
/// [`log::Tx`] so callers compose multi-step operations atomically.
pub struct Fs<Device> {
    cache: BlockIoCache<Device, BufferListMutex>,
    super_block: OnceInit<SuperBlock>,
    log_state: SpinLock<LogState>,
    log_cond: SpinLockCondVar,
    inode_table: SpinLock<[Option<inode::InodeEntry>; params::NINODE]>,
    devices: RwLock<DeviceTable>,
    params: Params,
}

impl<Device> Fs<Device>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    /// Creates a filesystem handle over `device` and initializes the block
    /// cache. Call [`Fs::mount`] before any other operation.
    pub fn new(device: Device, params: Params) -> Self {
        let cache = BlockIoCache::new(device);
        cache.init(params.nbuf);
        Self {
            cache,
            super_block: OnceInit::new(),
            log_state: SpinLock::new(LogState::new()),
            log_cond: SpinLockCondVar::new(),
            inode_table: SpinLock::new([const { None }; params::NINODE]),
            devices: RwLock::new(DeviceTable::new()),
            params,
        }
    }

    /// Reads the superblock and replays any committed-but-uninstalled log
    /// transaction.
    ///
    /// # Panics
    ///
    /// Panics if the superblock's magic number doesn't match
    /// [`SuperBlock::FS_MAGIC`] — the device doesn't hold a blockfs image.
    pub fn mount(&self) {
        let mut br = self.cache.get(SuperBlock::SUPER_BLOCK_NO.as_index());
        let Ok(bg) = br.lock().read() else {
            unreachable!("block device read is treated as infallible")
        };
        self.super_block.init_by_ref(bg.data::<SuperBlock>());
        drop(bg);

        assert_eq!(
            self.super_block().magic,
            SuperBlock::FS_MAGIC,
            "not a blockfs filesystem image"
        );

        self.recover_log();
        log::info!(
            "mounted: {} blocks, {} inodes, {} log blocks",
            self.super_block().size,
            self.super_block().ninodes,
            self.super_block().nlog
        );
    }

    #[must_use]
    pub fn super_block(&self) -> &SuperBlock {
        self.super_block.get()
    }

    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn devices(&self) -> RwLockReadGuard<'_, DeviceTable> {
        self.devices.read().unwrap()
    }

    pub fn register_device(&self, major: i16, driver: Arc<dyn CharDevice + Send + Sync>) {
        self.devices.write().unwrap().register(major, driver);
    }

    pub(crate) fn device_cache(&self) -> &BlockIoCache<Device, BufferListMutex> {
        &self.cache
    }

    /// A handle on the root directory's inode, usable as any caller's
    /// initial working directory.
    #[must_use]
    pub fn root_handle(&self) -> inode::Inode {
        let tx = self.begin_read_tx();
        inode::TxInode::get(&tx, InodeNo::ROOT).handle()
    }

    pub(crate) fn log_state(&self) -> &SpinLock<LogState> {
        &self.log_state
    }

    pub(crate) fn log_cond(&self) -> &SpinLockCondVar {
        &self.log_cond
    }

    pub(crate) fn inode_table(&self) -> &SpinLock<[Option<inode::InodeEntry>; params::NINODE]> {
        &self.inode_table
    }

    /// Reads a block through the cache, inside any transaction.
    pub(crate) fn get_block<const READ_ONLY: bool>(
        &self,
        _tx: &Tx<'_, Device, READ_ONLY>,
        bn: BlockNo,
    ) -> BlockHandle<'_, Device> {
        self.cache.get(bn.as_index())
    }
}
