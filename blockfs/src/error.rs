//! User-recoverable filesystem errors.
//!
//! Resource exhaustion (no free block, no free inode, no free cache slot) and
//! invariant violations (double-free, unlocking an unheld lock, loading an
//! inode whose on-disk type is 0) are not represented here: those are bugs or
//! configuration problems, not conditions a caller can recover from, and are
//! reported via `panic!` at the point of detection instead.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("no such file or directory")]
    NotFound,

    #[error("file or directory already exists")]
    AlreadyExists,

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,

    #[error("directory not empty")]
    NotEmpty,

    #[error("empty or all-slash path has no final component")]
    InvalidName,

    #[error("offset or length overflows, or exceeds the maximum file size")]
    TooLarge,

    #[error("no device driver registered for major number {0}")]
    UnsupportedDevice(i16),

    #[error("cannot link across devices")]
    DifferentDevice,
}
