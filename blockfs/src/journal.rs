//! Write-ahead logging for crash-consistent multi-block updates.
//!
//! A transaction ([`Tx`]) groups the block writes of one top-level
//! filesystem operation. The log only commits when no transaction is
//! outstanding, so there is never any question of a commit observing a
//! half-finished operation's writes.
//!
//! The log is a physical redo log:
//!
//! ```text
//! header block, containing block #s for block A, B, C, ...
//! block A
//! block B
//! block C
//! ...
//! ```
//!
//! A non-empty header on disk means a committed transaction that was never
//! installed to its home blocks — `Fs::mount` replays it before anything
//! else touches the device.

use block_io::BlockDevice;
use blockfs_types::{BlockNo, LogHeader, SuperBlock};
use dataview::PodMethods as _;

use crate::{BlockGuard, Fs, FS_BLOCK_SIZE};

pub(crate) struct LogState {
    pub(crate) outstanding: usize,
    /// `None` while a commit is in progress.
    pub(crate) header: Option<Box<LogHeader>>,
}

impl LogState {
    pub(crate) fn new() -> Self {
        Self {
            outstanding: 0,
            header: Some(Box::new(LogHeader::zeroed())),
        }
    }
}

/// A handle on one transaction.
///
/// `READ_ONLY` transactions exist so read paths (e.g. mounting, `stat`) can
/// reuse the same inode and block-access API as mutating ones without being
/// able to enlist a write. Dropping a `Tx<false>` ends the transaction,
/// committing if it was the last one outstanding.
pub struct Tx<'fs, Device, const READ_ONLY: bool> {
    pub(crate) fs: &'fs Fs<Device>,
}

impl<'fs, Device> Tx<'fs, Device, true> {
    /// Reborrows this transaction as a writable one, if the underlying
    /// transaction is already writable.
    ///
    /// A `Tx` opened purely for reading (e.g. during mount) cannot escalate:
    /// there is no outstanding write transaction to attach to, so this
    /// always returns `None` for a genuinely read-only `Tx`.
    #[must_use]
    pub fn to_writable(&self) -> Option<&Tx<'fs, Device, false>> {
        None
    }
}

impl<'fs, Device> Tx<'fs, Device, false> {
    #[must_use]
    pub fn to_writable(&self) -> Option<&Tx<'fs, Device, false>> {
        Some(self)
    }
}

impl<Device, const READ_ONLY: bool> Drop for Tx<'_, Device, READ_ONLY> {
    fn drop(&mut self) {
        if READ_ONLY {
            return;
        }
        self.fs.end_op();
    }
}

impl<Device> Fs<Device>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    /// Reads the on-disk log header; if it describes a committed
    /// transaction, replays it before any other block I/O occurs.
    pub(crate) fn recover_log(&self) {
        let sb = self.super_block();
        let mut header = Box::new(LogHeader::zeroed());
        self.read_log_head(sb, &mut header);
        self.install_trans(sb, &header, true);
        header.set_len(0);
        self.write_log_head(sb, &header);
    }

    fn read_log_head(&self, sb: &SuperBlock, out: &mut LogHeader) {
        let mut br = self.device_cache().get(sb.log_header_block().as_index());
        let Ok(bg) = br.lock().read() else {
            unreachable!("block device read is treated as infallible")
        };
        out.copy_from(bg.data::<LogHeader>());
    }

    fn write_log_head(&self, sb: &SuperBlock, header: &LogHeader) {
        let mut br = self.device_cache().get(sb.log_header_block().as_index());
        let mut bg = br.lock().zeroed();
        bg.data_mut::<LogHeader>().copy_from(header);
        bg.write().unwrap();
    }

    fn write_log_body(&self, sb: &SuperBlock, header: &LogHeader) {
        for (tail, bn) in header.block_indices().iter().enumerate() {
            let mut from_br = self.device_cache().get(*bn as usize);
            let Ok(from_bg) = from_br.lock().read() else {
                unreachable!("block device read is treated as infallible")
            };
            let mut to_br = self.device_cache().get(sb.log_body_block(tail).as_index());
            let mut to_bg = to_br.lock().set_data(from_bg.bytes());
            to_bg.write().unwrap();
        }
    }

    /// Copies every logged block from the log body to its home location.
    ///
    /// During normal commit this unpins each block after installing it, so
    /// it can be evicted from the cache again; during recovery (`recovering`)
    /// the blocks were never pinned, so there is nothing to undo.
    fn install_trans(&self, sb: &SuperBlock, header: &LogHeader, recovering: bool) {
        for (tail, bn) in header.block_indices().iter().enumerate() {
            let mut from_br = self.device_cache().get(sb.log_body_block(tail).as_index());
            let Ok(from_bg) = from_br.lock().read() else {
                unreachable!("block device read is treated as infallible")
            };
            let mut to_br = self.device_cache().get(*bn as usize);
            let mut to_bg = to_br.lock().set_data(from_bg.bytes());
            to_bg.write().unwrap();
            if !recovering {
                unsafe {
                    assert!(to_bg.pin_count() > 2, "installed block was not pinned");
                    to_bg.unpin();
                }
            }
        }
    }

    fn commit(&self, header: &LogHeader) {
        if header.is_empty() {
            return;
        }
        let sb = self.super_block();
        self.write_log_body(sb, header); // copy dirty blocks into the log
        self.write_log_head(sb, header); // the real commit point
        self.install_trans(sb, header, false); // copy from log to home blocks
        let mut empty = LogHeader::zeroed();
        empty.set_len(0);
        self.write_log_head(sb, &empty); // erase the transaction from the log
    }

    /// Starts a read-only transaction.
    ///
    /// Read-only transactions never enlist a block and so never block
    /// waiting for log space; use this for `stat`-like operations and for
    /// mounting.
    pub fn begin_read_tx(&self) -> Tx<'_, Device, true> {
        Tx { fs: self }
    }

    /// Starts a transaction.
    ///
    /// Blocks if admitting this transaction's worst-case block usage could
    /// exceed the log's capacity; the caller is woken once an in-flight
    /// commit has freed space.
    pub fn begin_op(&self) -> Tx<'_, Device, false> {
        let mut state = self.log_state().lock();
        loop {
            let Some(header) = &state.header else {
                state = self.log_cond().wait(state);
                continue;
            };
            let max_op_blocks = self.params().max_op_blocks;
            if header.len() + (state.outstanding + 1) * max_op_blocks
                > blockfs_types::MAX_LOG_COUNT
            {
                state = self.log_cond().wait(state);
                continue;
            }
            state.outstanding += 1;
            break;
        }
        Tx { fs: self }
    }

    fn end_op(&self) {
        let mut to_commit = None;

        let mut state = self.log_state().lock();
        state.outstanding -= 1;
        assert!(state.header.is_some(), "end_op during a commit");
        if state.outstanding == 0 {
            to_commit = state.header.take();
        } else {
            self.log_cond().notify();
        }
        drop(state);

        if let Some(header) = to_commit {
            self.commit(&header);
            let mut state = self.log_state().lock();
            assert!(state.header.is_none());
            state.header = Some(header);
            self.log_cond().notify();
        }
    }

    /// Enlists a dirty block in the current transaction.
    ///
    /// Pins the buffer so it survives recycling while referenced only by
    /// block number in the log header; idempotent within one transaction
    /// (log absorption — re-enlisting an already-enlisted block is a no-op).
    pub(crate) fn log_write(&self, bg: &mut BlockGuard<'_, '_, Device, true>) {
        let mut state = self.log_state().lock();
        let header = state.header.as_mut().expect("log_write during a commit");
        assert!(
            header.len() < blockfs_types::MAX_LOG_COUNT
                && header.len() < self.super_block().max_log_len(),
            "transaction exceeds log capacity"
        );
        assert!(state.outstanding > 0, "log_write outside a transaction");

        let bn = u32::try_from(bg.index()).unwrap();
        if !header.block_indices().contains(&bn) {
            unsafe {
                bg.pin();
            }
            header.push(bn);
        }
    }
}
