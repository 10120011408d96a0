//! End-to-end scenarios exercising the public `ops`/`path` API against an
//! in-memory block device, mirroring the fault-consistency and directory
//! semantics a mounted filesystem must uphold.

use std::{convert::Infallible, sync::Mutex, thread};

use block_io::BlockDevice;
use blockfs::{Error, FS_BLOCK_SIZE, InodeNo, NUM_DIRECT_REFS, Params, T_DIR, T_FILE, process::Cwd};

struct MemDevice {
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

const TOTAL_BLOCKS: usize = 400;
const NLOG: u32 = 30;
const NINODES: u32 = 60;

fn build_image() -> Vec<[u8; FS_BLOCK_SIZE]> {
    let logstart: u32 = 2;
    let inodestart = logstart + NLOG + 1;
    let ipb = u32::try_from(blockfs::INODE_PER_BLOCK).unwrap();
    let inode_blocks = NINODES.div_ceil(ipb);
    let bmapstart = inodestart + inode_blocks;
    let bpb = u32::try_from(blockfs::BITS_PER_BLOCK).unwrap();
    let size = u32::try_from(TOTAL_BLOCKS).unwrap();
    let bmap_blocks = size.div_ceil(bpb);
    assert!(bmapstart + bmap_blocks < size, "test image too small");
    let nblocks = size - (bmapstart + bmap_blocks);

    let mut image = vec![[0u8; FS_BLOCK_SIZE]; TOTAL_BLOCKS];
    let sb = &mut image[1];
    sb[0..4].copy_from_slice(&blockfs::SuperBlock::FS_MAGIC.to_ne_bytes());
    sb[4..8].copy_from_slice(&size.to_ne_bytes());
    sb[8..12].copy_from_slice(&nblocks.to_ne_bytes());
    sb[12..16].copy_from_slice(&NINODES.to_ne_bytes());
    sb[16..20].copy_from_slice(&NLOG.to_ne_bytes());
    sb[20..24].copy_from_slice(&logstart.to_ne_bytes());
    sb[24..28].copy_from_slice(&inodestart.to_ne_bytes());
    sb[28..32].copy_from_slice(&bmapstart.to_ne_bytes());
    image
}

/// Mounts a fresh image and establishes the root directory the way a real
/// `mkfs` would: allocated, self-linked via `"."`/`".."`, `nlink == 1`.
fn mount() -> blockfs::Fs<MemDevice> {
    let device = MemDevice::new(build_image());
    let fs = blockfs::Fs::new(device, Params { nbuf: 64, ..Params::DEFAULT });
    fs.mount();

    let tx = fs.begin_op();
    let mut root = blockfs::inode::TxInode::alloc(&tx, T_DIR);
    assert_eq!(root.inum(), InodeNo::ROOT);
    let inum = root.inum();
    let mut locked = root.lock();
    locked.set_nlink(1);
    let mut dir = locked.as_dir().unwrap();
    dir.link(b".", inum).unwrap();
    dir.link(b"..", inum).unwrap();
    drop(dir);
    drop(locked);
    drop(root);
    drop(tx);

    fs
}

#[test]
fn create_read_close() {
    let fs = mount();
    let proc = Cwd::new(fs.root_handle());

    let tx = fs.begin_op();
    let mut ip = blockfs::ops::create(&tx, &proc, b"/a", T_FILE, 0, 0).unwrap();
    let payload = [0xABu8; 100];
    ip.lock().write(&payload, 0).unwrap();
    drop(ip);
    drop(tx);

    let tx = fs.begin_op();
    let mut found = blockfs::path::resolve(&tx, &proc, b"/a").unwrap();
    let locked = found.lock();
    let mut buf = [0u8; 100];
    let n = locked.read(&mut buf, 0).unwrap();
    assert_eq!(n, 100);
    assert!(buf.iter().all(|&b| b == 0xAB));
    assert_eq!(locked.size(), 100);
    assert_eq!(locked.nlink(), 1);
}

#[test]
fn indirect_allocation_boundary() {
    let fs = mount();
    let proc = Cwd::new(fs.root_handle());

    let tx = fs.begin_op();
    let mut ip = blockfs::ops::create(&tx, &proc, b"/big", T_FILE, 0, 0).unwrap();
    let off = NUM_DIRECT_REFS * FS_BLOCK_SIZE; // first indirect-addressed byte
    let mut locked = ip.lock();
    // A write can only start within or at the end of the current size, so
    // reaching the indirect region means growing through it first; every
    // byte below `off` stays zero because `alloc_block` always hands out a
    // zeroed block.
    locked.write(&vec![0u8; off], 0).unwrap();
    locked.write(b"x", off).unwrap();
    assert_eq!(locked.size() as usize, off + 1);

    let mut below = vec![0u8; off];
    let n = locked.read(&mut below, 0).unwrap();
    assert_eq!(n, off);
    assert!(below.iter().all(|&b| b == 0));
}

#[test]
fn unlink_last_link_frees_the_inode() {
    let fs = mount();
    let proc = Cwd::new(fs.root_handle());

    let tx = fs.begin_op();
    let mut ip = blockfs::ops::create(&tx, &proc, b"/spread", T_FILE, 0, 0).unwrap();
    let touch_off = NUM_DIRECT_REFS * FS_BLOCK_SIZE + 4 * FS_BLOCK_SIZE;
    let mut locked = ip.lock();
    locked.write(&vec![0u8; touch_off], 0).unwrap();
    locked.write(b"y", touch_off).unwrap();
    drop(locked);
    drop(ip);

    blockfs::ops::unlink(&tx, &proc, b"/spread").unwrap();
    drop(tx);

    let tx = fs.begin_op();
    assert_eq!(
        blockfs::path::resolve(&tx, &proc, b"/spread").unwrap_err(),
        Error::NotFound
    );

    // The freed inode number is reusable: a fresh create claims it again.
    let reused = blockfs::ops::create(&tx, &proc, b"/again", T_FILE, 0, 0).unwrap();
    assert_eq!(reused.lock().size(), 0);
}

#[test]
fn directory_deletion_refuses_nonempty() {
    let fs = mount();
    let proc = Cwd::new(fs.root_handle());

    let tx = fs.begin_op();
    blockfs::ops::create(&tx, &proc, b"/d", T_DIR, 0, 0).unwrap();
    blockfs::ops::create(&tx, &proc, b"/d/f", T_FILE, 0, 0).unwrap();

    assert_eq!(
        blockfs::ops::unlink(&tx, &proc, b"/d").unwrap_err(),
        Error::NotEmpty
    );
    let mut still_there = blockfs::path::resolve(&tx, &proc, b"/d").unwrap();
    assert!(still_there.lock().is_dir());
}

#[test]
fn concurrent_create_same_name_yields_one_entry() {
    let fs = mount();
    let proc = Cwd::new(fs.root_handle());

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let tx = fs.begin_op();
                let _ = blockfs::ops::create(&tx, &proc, b"/x", T_FILE, 0, 0);
            });
        }
    });

    let tx = fs.begin_op();
    let mut parent = blockfs::path::resolve(&tx, &proc, b"/").unwrap();
    let locked = parent.lock();
    let mut matches = 0;
    for off in (0..locked.size() as usize).step_by(size_of::<blockfs_types::DirEntry>()) {
        let de = locked.read_as::<blockfs_types::DirEntry>(off);
        if de.inum().is_some() && de.is_same_name(b"x") {
            matches += 1;
        }
    }
    assert_eq!(matches, 1);
}

#[test]
fn path_component_longer_than_dir_size_is_truncated_not_rejected() {
    let fs = mount();
    let proc = Cwd::new(fs.root_handle());

    // Two names that agree on their first DIR_SIZE bytes and differ only
    // past it are the same directory entry: names are compared truncated to
    // DIR_SIZE, never NUL-terminated or length-checked, so resolving either
    // one finds the file created under the other.
    let mut long_name = vec![b'a'; blockfs::DIR_SIZE];
    long_name.extend_from_slice(b"-first");
    let mut path = b"/".to_vec();
    path.extend_from_slice(&long_name);

    let tx = fs.begin_op();
    let created = blockfs::ops::create(&tx, &proc, &path, T_FILE, 0, 0).unwrap();
    let inum = created.inum();
    drop(created);

    let mut other_name = vec![b'a'; blockfs::DIR_SIZE];
    other_name.extend_from_slice(b"-second");
    let mut other_path = b"/".to_vec();
    other_path.extend_from_slice(&other_name);
    let found = blockfs::path::resolve(&tx, &proc, &other_path).unwrap();
    assert_eq!(found.inum(), inum);

    // A directory entry instead collides outright: it can't silently reopen
    // as an existing file the way T_FILE does.
    assert_eq!(
        blockfs::ops::create(&tx, &proc, &other_path, T_DIR, 0, 0).unwrap_err(),
        Error::AlreadyExists
    );
}
