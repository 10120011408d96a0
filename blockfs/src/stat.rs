//! A snapshot of an inode's metadata, returned by `stat`-like operations.

use blockfs_types::InodeNo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub ino: InodeNo,
    pub ty: i16,
    pub nlink: i16,
    pub size: u64,
}
