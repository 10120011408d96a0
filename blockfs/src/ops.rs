//! Top-level filesystem operations: create, link, unlink.
//!
//! Each composes [`path`] resolution with [`inode`] and [`inode::directory`]
//! primitives inside one write transaction, so a crash between their
//! individual block writes is never observable — the log either replays the
//! whole operation or none of it.

use block_io::BlockDevice;
use blockfs_types::{DIR_SIZE, T_DEVICE, T_FILE};

use crate::{
    Error, FS_BLOCK_SIZE,
    inode::TxInode,
    journal::Tx,
    path,
    process::ProcessContext,
};

/// Creates (or, for a plain file, reopens) the inode named by `path`.
///
/// If `path` already names a file and `ty == T_FILE`, and the existing inode
/// is a file or device, that inode is returned rather than erroring — this
/// is the `open(O_CREATE)` case. Any other name collision is
/// [`Error::AlreadyExists`].
pub fn create<'tx, Device>(
    tx: &'tx Tx<'tx, Device, false>,
    proc: &dyn ProcessContext,
    path: &[u8],
    ty: i16,
    major: i16,
    minor: i16,
) -> Result<TxInode<'tx, Device, false>, Error>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    let mut name_buf = [0u8; DIR_SIZE];
    let (mut parent_ip, name) = path::resolve_parent(tx, proc, path, &mut name_buf)?;
    let name = name.to_vec();

    let mut parent_lip = parent_ip.lock();
    let Some(mut parent_dp) = parent_lip.as_dir() else {
        return Err(Error::NotADirectory);
    };

    if let Some((mut existing_ip, _off)) = parent_dp.lookup(&name) {
        let existing_ty = existing_ip.lock().ty();
        if ty == T_FILE && matches!(existing_ty, T_FILE | T_DEVICE) {
            return Ok(existing_ip);
        }
        return Err(Error::AlreadyExists);
    }

    let mut child_ip = TxInode::alloc(tx, ty);
    let parent_inum = parent_dp.inum();
    {
        let mut child_lip = child_ip.lock();
        if ty == T_DEVICE {
            child_lip.set_device(major, minor);
        }

        if let Some(mut child_dp) = child_lip.as_dir() {
            let self_inum = child_dp.inum();
            child_dp.link(b".", self_inum)?;
            child_dp.link(b"..", parent_inum)?;
        }
    }

    parent_dp.link(&name, child_ip.inum())?;

    if child_ip.lock().is_dir() {
        parent_lip.incr_nlink(); // for the child's ".."
    }
    child_ip.lock().incr_nlink();

    Ok(child_ip)
}

/// Removes the directory entry named by `path`.
///
/// # Errors
///
/// [`Error::InvalidName`] for `"."` or `".."`. [`Error::NotEmpty`] if `path`
/// names a non-empty directory.
pub fn unlink<Device>(
    tx: &Tx<'_, Device, false>,
    proc: &dyn ProcessContext,
    path: &[u8],
) -> Result<(), Error>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    let mut name_buf = [0u8; DIR_SIZE];
    let (mut parent_ip, name) = path::resolve_parent(tx, proc, path, &mut name_buf)?;
    if name == b"." || name == b".." {
        return Err(Error::InvalidName);
    }
    let name = name.to_vec();

    let mut parent_lip = parent_ip.lock();
    let Some(mut parent_dp) = parent_lip.as_dir() else {
        return Err(Error::NotADirectory);
    };

    let (mut child_ip, off) = parent_dp.lookup(&name).ok_or(Error::NotFound)?;
    let mut child_lip = child_ip.lock();
    debug_assert!(child_lip.nlink() > 0);

    if let Some(mut child_dp) = child_lip.as_dir() {
        if !child_dp.is_empty() {
            return Err(Error::NotEmpty);
        }
    }

    parent_dp.unlink_at(off)?;
    if child_lip.is_dir() {
        parent_lip.decr_nlink(); // drop the removed child's ".." reference
    }
    child_lip.decr_nlink();

    Ok(())
}

/// Adds a new directory entry at `new_path` naming the same inode as
/// `old_path`.
///
/// # Errors
///
/// [`Error::IsADirectory`] if `old_path` names a directory — hard links to
/// directories are not supported.
pub fn link<Device>(
    tx: &Tx<'_, Device, false>,
    proc: &dyn ProcessContext,
    old_path: &[u8],
    new_path: &[u8],
) -> Result<(), Error>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    let mut old_ip = path::resolve(tx, proc, old_path)?;
    if old_ip.lock().is_dir() {
        return Err(Error::IsADirectory);
    }

    let mut name_buf = [0u8; DIR_SIZE];
    let (mut parent_ip, name) = path::resolve_parent(tx, proc, new_path, &mut name_buf)?;
    let name = name.to_vec();

    let mut parent_lip = parent_ip.lock();
    let Some(mut parent_dp) = parent_lip.as_dir() else {
        return Err(Error::NotADirectory);
    };
    parent_dp.link(&name, old_ip.inum())?;

    old_ip.lock().incr_nlink();
    Ok(())
}
