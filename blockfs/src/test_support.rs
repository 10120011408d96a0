//! An in-memory block device and prebuilt filesystem images for unit tests.

use std::{convert::Infallible, sync::Mutex};

use block_io::BlockDevice;

use crate::{FS_BLOCK_SIZE, Fs, Params};

pub(crate) const TOTAL_BLOCKS: usize = 200;
pub(crate) const NLOG: u32 = 30;
pub(crate) const NINODES: u32 = 50;

pub(crate) struct MemDevice {
    blocks: Vec<Mutex<[u8; FS_BLOCK_SIZE]>>,
}

impl MemDevice {
    fn new(image: Vec<[u8; FS_BLOCK_SIZE]>) -> Self {
        Self {
            blocks: image.into_iter().map(Mutex::new).collect(),
        }
    }
}

impl BlockDevice<FS_BLOCK_SIZE> for MemDevice {
    type Error = Infallible;

    fn read(&self, index: usize, data: &mut [u8; FS_BLOCK_SIZE]) -> Result<(), Self::Error> {
        data.copy_from_slice(&*self.blocks[index].lock().unwrap());
        Ok(())
    }

    fn write(&self, index: usize, data: &[u8; FS_BLOCK_SIZE]) -> Result<(), Self::Error> {
        self.blocks[index].lock().unwrap().copy_from_slice(data);
        Ok(())
    }
}

/// Builds a zeroed filesystem image of [`TOTAL_BLOCKS`] blocks with a valid
/// superblock at block 1, an empty log, an all-free inode table, and an
/// all-free bitmap, packing the superblock's `u32` fields by hand to avoid
/// depending on any particular in-memory struct layout of the test harness
/// itself.
fn build_image() -> Vec<[u8; FS_BLOCK_SIZE]> {
    let logstart: u32 = 2;
    let inodestart = logstart + NLOG + 1;
    let ipb = u32::try_from(blockfs_types::INODE_PER_BLOCK).unwrap();
    let inode_blocks = NINODES.div_ceil(ipb);
    let bmapstart = inodestart + inode_blocks;
    let bpb = u32::try_from(blockfs_types::BITS_PER_BLOCK).unwrap();
    let size = u32::try_from(TOTAL_BLOCKS).unwrap();
    let bmap_blocks = size.div_ceil(bpb);
    assert!(bmapstart + bmap_blocks < size, "test image too small");
    let nblocks = size - (bmapstart + bmap_blocks);

    let mut image = vec![[0u8; FS_BLOCK_SIZE]; TOTAL_BLOCKS];
    let sb = &mut image[1];
    sb[0..4].copy_from_slice(&blockfs_types::SuperBlock::FS_MAGIC.to_ne_bytes());
    sb[4..8].copy_from_slice(&size.to_ne_bytes());
    sb[8..12].copy_from_slice(&nblocks.to_ne_bytes());
    sb[12..16].copy_from_slice(&NINODES.to_ne_bytes());
    sb[16..20].copy_from_slice(&NLOG.to_ne_bytes());
    sb[20..24].copy_from_slice(&logstart.to_ne_bytes());
    sb[24..28].copy_from_slice(&inodestart.to_ne_bytes());
    sb[28..32].copy_from_slice(&bmapstart.to_ne_bytes());
    image
}

/// A freshly mounted, empty filesystem: every inode and data block is free.
pub(crate) fn test_fs() -> Fs<MemDevice> {
    let device = MemDevice::new(build_image());
    let fs = Fs::new(device, Params { nbuf: 32, ..Params::DEFAULT });
    fs.mount();
    fs
}

/// A freshly mounted filesystem whose root directory has already been
/// allocated, linked to itself via `"."`/`".."`, and given `nlink = 1` — the
/// state a real `mkfs` would leave it in.
pub(crate) fn test_fs_with_root() -> Fs<MemDevice> {
    let fs = test_fs();
    {
        let tx = fs.begin_op();
        let mut root = crate::inode::TxInode::alloc(&tx, blockfs_types::T_DIR);
        assert_eq!(root.inum(), blockfs_types::InodeNo::ROOT);
        let inum = root.inum();
        let mut locked = root.lock();
        locked.set_nlink(1);
        let mut dir = locked.as_dir().unwrap();
        dir.link(b".", inum).unwrap();
        dir.link(b"..", inum).unwrap();
    }
    fs
}
