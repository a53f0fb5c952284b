//! Compile-time sizing.

/// Capacity of the in-memory inode cache.
pub const NINODE: usize = 50;

/// Number of block buffers.
pub const NBUF: usize = 30;

/// Number of major device numbers.
pub const NDEV: usize = 10;

/// Inode number of the root directory.
pub const ROOT_INUM: u32 = 1;

/// Capacity of the directory name cache.
pub const NC_SIZE: usize = 64;
