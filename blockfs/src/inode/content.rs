//! File content indexing: direct and single-indirect block addressing, and
//! byte-range read/write over a locked inode.
//!
//! A regular file or directory's bytes live in up to [`blockfs_types::MAX_FILE`]
//! blocks, addressed by [`blockfs_types::NUM_DIRECT_REFS`] direct pointers
//! plus one indirect block of [`blockfs_types::NUM_INDIRECT_REFS`] more. A
//! `T_DEVICE` inode has no content of its own: reads and writes dispatch to
//! its major number's driver instead.

use blockfs_types::{self as repr, NUM_DIRECT_REFS};
use block_io::BlockDevice;
use dataview::{Pod, PodMethods as _};

use super::LockedTxInode;
use crate::{FS_BLOCK_SIZE, Error};

impl<Device, const READ_ONLY: bool> LockedTxInode<'_, '_, Device, READ_ONLY>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    /// The block number holding logical block `bn_index` of this inode's
    /// content, if it has been allocated.
    fn mapped_block(&self, bn_index: usize) -> Option<repr::BlockNo> {
        assert!(bn_index < repr::MAX_FILE, "block index exceeds MAX_FILE");
        if bn_index < NUM_DIRECT_REFS {
            return self.data().addrs[bn_index];
        }
        let indirect_bn = self.data().addrs[NUM_DIRECT_REFS]?;
        let mut br = self.tx.fs.get_block(self.tx, indirect_bn);
        let Ok(bg) = br.lock().read() else {
            unreachable!("block device read is treated as infallible")
        };
        bg.data::<repr::IndirectBlock>().get(bn_index - NUM_DIRECT_REFS)
    }

    /// Reads up to `dst.len()` bytes starting at byte offset `off`, stopping
    /// at the inode's size. Returns the number of bytes actually read.
    pub fn read(&self, dst: &mut [u8], off: usize) -> Result<usize, Error> {
        if self.is_device() {
            let major = self.data().major;
            let devices = self.tx.fs.devices();
            let driver = devices.get(major)?;
            return driver.read(dst, off);
        }

        let size = self.size() as usize;
        if off >= size {
            return Ok(0);
        }
        let want = dst.len().min(size - off);

        let mut done = 0;
        while done < want {
            let bn_index = (off + done) / FS_BLOCK_SIZE;
            let bn_off = (off + done) % FS_BLOCK_SIZE;
            let Some(bn) = self.mapped_block(bn_index) else {
                break;
            };
            let mut br = self.tx.fs.get_block(self.tx, bn);
            let Ok(bg) = br.lock().read() else {
                unreachable!("block device read is treated as infallible")
            };
            let chunk = (FS_BLOCK_SIZE - bn_off).min(want - done);
            dst[done..done + chunk].copy_from_slice(&bg.bytes()[bn_off..bn_off + chunk]);
            done += chunk;
        }
        Ok(done)
    }

    /// Reads a single `T` at byte offset `off`, zero-filling whatever part of
    /// it falls past the inode's current size.
    pub fn read_as<T: Pod>(&self, off: usize) -> T {
        let mut buf = vec![0u8; size_of::<T>()];
        let _ = self.read(&mut buf, off);
        *buf.as_data_view().get::<T>(0)
    }
}

impl<Device> LockedTxInode<'_, '_, Device, false>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    /// The block number for logical block `bn_index`, allocating it (and, if
    /// needed, the indirect block) on first use.
    fn ensure_block(&mut self, bn_index: usize) -> repr::BlockNo {
        assert!(bn_index < repr::MAX_FILE, "block index exceeds MAX_FILE");

        if bn_index < NUM_DIRECT_REFS {
            if let Some(bn) = self.data().addrs[bn_index] {
                return bn;
            }
            let bn = self.tx.fs.alloc_block(self.tx);
            self.data_mut().addrs[bn_index] = Some(bn);
            return bn;
        }

        let indirect_bn = match self.data().addrs[NUM_DIRECT_REFS] {
            Some(bn) => bn,
            None => {
                let bn = self.tx.fs.alloc_block(self.tx);
                self.data_mut().addrs[NUM_DIRECT_REFS] = Some(bn);
                bn
            }
        };

        let ibn_index = bn_index - NUM_DIRECT_REFS;
        let mut br = self.tx.fs.get_block(self.tx, indirect_bn);
        let Ok(mut bg) = br.lock().read() else {
            unreachable!("block device read is treated as infallible")
        };
        if let Some(bn) = bg.data::<repr::IndirectBlock>().get(ibn_index) {
            return bn;
        }
        let bn = self.tx.fs.alloc_block(self.tx);
        bg.data_mut::<repr::IndirectBlock>().set(ibn_index, Some(bn));
        self.tx.fs.log_write(&mut bg);
        bn
    }

    /// Writes `src` at byte offset `off`, allocating blocks as needed and
    /// extending the inode's size if the write reaches past it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooLarge`] if `off` is past the inode's current
    /// size, if `off + src.len()` overflows, or if it exceeds
    /// [`blockfs_types::MAX_FILE`] blocks' worth of bytes. A write may only
    /// start within or at the end of the file, never past it — this keeps
    /// every block below `size` allocated, so a read never has to cross a
    /// genuine hole.
    pub fn write(&mut self, src: &[u8], off: usize) -> Result<usize, Error> {
        if self.is_device() {
            let major = self.data().major;
            let devices = self.tx.fs.devices();
            let driver = devices.get(major)?;
            return driver.write(src, off);
        }

        if off > self.size() as usize {
            return Err(Error::TooLarge);
        }

        let end = off.checked_add(src.len()).ok_or(Error::TooLarge)?;
        if end > repr::MAX_FILE * FS_BLOCK_SIZE {
            return Err(Error::TooLarge);
        }

        let mut done = 0;
        while done < src.len() {
            let bn_index = (off + done) / FS_BLOCK_SIZE;
            let bn_off = (off + done) % FS_BLOCK_SIZE;
            let bn = self.ensure_block(bn_index);
            let mut br = self.tx.fs.get_block(self.tx, bn);
            let Ok(mut bg) = br.lock().read() else {
                unreachable!("block device read is treated as infallible")
            };
            let chunk = (FS_BLOCK_SIZE - bn_off).min(src.len() - done);
            bg.bytes_mut()[bn_off..bn_off + chunk].copy_from_slice(&src[done..done + chunk]);
            self.tx.fs.log_write(&mut bg);
            done += chunk;
        }

        if end > self.size() as usize {
            self.data_mut().size = u32::try_from(end).unwrap();
        }
        self.update();
        Ok(done)
    }

    /// Writes a single `T` at byte offset `off`.
    pub fn write_as<T: Pod>(&mut self, value: &T, off: usize) -> Result<usize, Error> {
        self.write(value.as_bytes(), off)
    }

    /// Releases every block this inode addresses, direct and indirect, and
    /// resets its size to zero.
    pub(crate) fn truncate(&mut self) {
        for i in 0..NUM_DIRECT_REFS {
            if let Some(bn) = self.data_mut().addrs[i].take() {
                self.tx.fs.free_block(self.tx, bn);
            }
        }

        if let Some(indirect_bn) = self.data_mut().addrs[NUM_DIRECT_REFS].take() {
            let mut br = self.tx.fs.get_block(self.tx, indirect_bn);
            let Ok(mut bg) = br.lock().read() else {
                unreachable!("block device read is treated as infallible")
            };
            let entries: Vec<_> = bg.data_mut::<repr::IndirectBlock>().drain().flatten().collect();
            drop(bg);
            for bn in entries {
                self.tx.fs.free_block(self.tx, bn);
            }
            self.tx.fs.free_block(self.tx, indirect_bn);
        }

        self.data_mut().size = 0;
        self.update();
    }

    /// Marks the on-disk inode slot free. The caller must have already
    /// truncated its content and brought `nlink` to zero.
    pub(crate) fn free(&mut self) {
        debug_assert_eq!(self.nlink(), 0);
        debug_assert_eq!(self.size(), 0);

        let sb = self.tx.fs.super_block();
        let inum = self.inum;
        let mut br = self.tx.fs.get_block(self.tx, sb.inode_block(inum));
        let Ok(mut bg) = br.lock().read() else {
            unreachable!("block device read is treated as infallible")
        };
        *bg.data_mut::<repr::InodeBlock>().inode_mut(inum) = repr::Inode::zeroed();
        self.tx.fs.log_write(&mut bg);
        *self.locked = None;
    }
}
