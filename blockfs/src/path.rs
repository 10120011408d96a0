//! Multi-component path resolution.

use block_io::BlockDevice;
use blockfs_types::{DIR_SIZE, InodeNo};

use crate::{
    Error, FS_BLOCK_SIZE,
    inode::TxInode,
    journal::Tx,
    process::ProcessContext,
};

/// Splits the next path element off the front of `path`.
///
/// Returns the element and whatever follows it, with any run of leading or
/// separating slashes collapsed away. Returns `None` once nothing but
/// slashes remains.
///
/// # Examples
///
/// ```text
/// assert_eq!(skip_elem(b"a/bb/c"), Some((&b"a"[..], &b"bb/c"[..])));
/// assert_eq!(skip_elem(b"///a//bb"), Some((&b"a"[..], &b"bb"[..])));
/// assert_eq!(skip_elem(b"a"), Some((&b"a"[..], &b""[..])));
/// assert_eq!(skip_elem(b"a/"), Some((&b"a"[..], &b""[..])));
/// assert_eq!(skip_elem(b""), None);
/// assert_eq!(skip_elem(b"///"), None);
/// ```
fn skip_elem(path: &[u8]) -> Option<(&[u8], &[u8])> {
    let start = path.iter().position(|&c| c != b'/')?;
    let path = &path[start..];
    let end = path.iter().position(|&c| c == b'/').unwrap_or(path.len());
    let elem = &path[..end];
    let path = &path[end..];
    let next = path.iter().position(|&c| c != b'/').unwrap_or(path.len());
    Some((elem, &path[next..]))
}

fn resolve_impl<'tx, Device, const READ_ONLY: bool>(
    tx: &'tx Tx<'tx, Device, READ_ONLY>,
    proc: &dyn ProcessContext,
    path: &[u8],
    parent: bool,
    mut name_out: Option<&mut [u8; DIR_SIZE]>,
) -> Result<TxInode<'tx, Device, READ_ONLY>, Error>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    let mut ip = if path.first() == Some(&b'/') {
        TxInode::get(tx, InodeNo::ROOT)
    } else {
        proc.cwd().to_tx(tx)
    };

    let mut path = path;
    while let Some((name, rest)) = skip_elem(path) {
        path = rest;
        if let Some(name_out) = &mut name_out {
            let len = usize::min(name.len(), name_out.len());
            name_out[..len].copy_from_slice(&name[..len]);
            name_out[len..].fill(0);
        }

        let mut lip = ip.lock();
        let Some(mut dip) = lip.as_dir() else {
            return Err(Error::NotADirectory);
        };

        if parent && path.is_empty() {
            // Stop one level early: the caller wants the containing
            // directory, not the final component itself.
            drop(lip);
            return Ok(ip);
        }

        let Some((next, _off)) = dip.lookup(name) else {
            return Err(Error::NotFound);
        };
        drop(lip);
        ip = next;
    }

    if parent {
        return Err(Error::InvalidName);
    }
    Ok(ip)
}

/// Resolves `path` to its inode, relative to `proc`'s current directory if
/// `path` doesn't start with `/`.
pub fn resolve<'tx, Device, const READ_ONLY: bool>(
    tx: &'tx Tx<'tx, Device, READ_ONLY>,
    proc: &dyn ProcessContext,
    path: &[u8],
) -> Result<TxInode<'tx, Device, READ_ONLY>, Error>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    resolve_impl(tx, proc, path, false, None)
}

/// Resolves `path`'s containing directory, and returns the final path
/// component's bytes separately.
///
/// A component longer than [`DIR_SIZE`] bytes is not rejected: `name_out`
/// only ever holds its first `DIR_SIZE` bytes, the same truncated prefix
/// directory lookups compare against.
///
/// # Errors
///
/// Returns [`Error::InvalidName`] if `path` is empty or made up entirely of
/// slashes, and so has no final component to split off.
pub fn resolve_parent<'tx, 'n, Device, const READ_ONLY: bool>(
    tx: &'tx Tx<'tx, Device, READ_ONLY>,
    proc: &dyn ProcessContext,
    path: &[u8],
    name: &'n mut [u8; DIR_SIZE],
) -> Result<(TxInode<'tx, Device, READ_ONLY>, &'n [u8]), Error>
where
    Device: BlockDevice<FS_BLOCK_SIZE>,
    Device::Error: std::fmt::Debug,
{
    let ip = resolve_impl(tx, proc, path, true, Some(name))?;
    let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    Ok((ip, &name[..len]))
}
