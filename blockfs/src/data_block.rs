//! The free-block bitmap allocator.

use block_io::BlockDevice;
use blockfs_types::{BITS_PER_BLOCK, BlockNo, BmapBlock};
use dataview::PodMethods as _;

use crate::{FS_BLOCK_SIZE, Fs, journal::Tx};

impl<Device> Fs<Device>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    fn zero_block(&self, tx: &Tx<'_, Device, false>, bn: BlockNo) {
        let mut br = self.get_block(tx, bn);
        let mut bg = br.lock().zeroed();
        self.log_write(&mut bg);
    }

    /// Allocates a freshly-zeroed data block.
    ///
    /// # Panics
    ///
    /// Panics if the device has no free data block — resource exhaustion is
    /// a fatal, unrecoverable condition here.
    pub fn alloc_block(&self, tx: &Tx<'_, Device, false>) -> BlockNo {
        let sb = self.super_block();
        let size = usize::try_from(sb.size).unwrap();

        for bn0 in (0..size).step_by(BITS_PER_BLOCK) {
            let mut br = self.get_block(tx, sb.bmap_block(bn0));
            let Ok(mut bg) = br.lock().read() else {
                unreachable!("block device read is treated as infallible")
            };
            let Some(bni) = (0..BITS_PER_BLOCK)
                .take_while(|bni| bn0 + bni < size)
                .find(|bni| !bg.data::<BmapBlock>().bit(*bni))
            else {
                continue;
            };
            bg.data_mut::<BmapBlock>().set_bit(bni);
            self.log_write(&mut bg);

            let bn = BlockNo::new(u32::try_from(bn0 + bni).unwrap());
            self.zero_block(tx, bn);
            return bn;
        }
        panic!("out of disk blocks");
    }

    /// Frees a previously allocated data block.
    ///
    /// # Panics
    ///
    /// Panics if the block was already free — a double-free is a filesystem
    /// invariant violation, not a recoverable error.
    pub fn free_block(&self, tx: &Tx<'_, Device, false>, bn: BlockNo) {
        let sb = self.super_block();
        let mut br = self.get_block(tx, sb.bmap_block(bn.as_index()));
        let Ok(mut bg) = br.lock().read() else {
            unreachable!("block device read is treated as infallible")
        };
        let bi = bn.as_index() % BITS_PER_BLOCK;
        assert!(bg.data::<BmapBlock>().bit(bi), "freeing an already-free block");
        bg.data_mut::<BmapBlock>().clear_bit(bi);
        self.log_write(&mut bg);
    }
}
