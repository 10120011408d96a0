//! Tunable sizing parameters.
//!
//! `NINODE` sizes the in-memory inode table's backing array and so must stay
//! a compile-time constant, matching how the on-disk layout constants in
//! [`blockfs_types`] are fixed at filesystem-creation time. `nbuf` and
//! `max_op_blocks` only bound runtime behavior (cache size, how eagerly a
//! transaction blocks waiting for log space) and are plain [`Params`] fields
//! so a caller can size them to its workload.

/// Size of the in-memory inode cache table.
pub const NINODE: usize = 50;

#[derive(Debug, Clone, Copy)]
pub struct Params {
    /// Number of buffers in the block cache.
    pub nbuf: usize,
    /// Maximum number of distinct blocks a single transaction may enlist.
    ///
    /// Must leave headroom under [`blockfs_types::MAX_LOG_COUNT`] for
    /// concurrently outstanding transactions; [`Params::DEFAULT`] reserves a
    /// generous margin for a handful of concurrent callers.
    pub max_op_blocks: usize,
}

impl Params {
    pub const DEFAULT: Self = Self {
        nbuf: 64,
        max_op_blocks: 10,
    };
}

impl Default for Params {
    fn default() -> Self {
        Self::DEFAULT
    }
}
