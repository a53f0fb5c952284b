//! A small v6-style on-disk file system.
//!
//! Four layers, bottom up:
//!
//! * Blocks: a bitmap allocator for raw disk blocks.
//! * Inodes: unnamed file objects; a fixed-capacity in-memory cache with a
//!   reader/writer lock per inode that may be held across disk I/O.
//! * Directories: inodes whose content is a table of name/inum pairs.
//! * Names: path lookup over directories, with a name cache.
//!
//! There is no journal: metadata writes go straight to the device, one
//! block at a time.
//!
//! The crate is generic over the block device ([`Disk`]) and over the lock
//! primitives ([`Locks`]), so the same code runs against a kernel's spin
//! locks and scheduler or against `std::sync` in tests.
//!
//! A typical call sequence:
//!
//! ```ignore
//! let fs = Fs::new(device, 1);
//! let cwd = fs.root();
//! let ip = fs.namei(&cwd, b"/etc/motd")?;
//! let mut buf = [0; 128];
//! let n = ip.lock_read().read(&mut buf, 0)?;
//! ```
//!
//! Handles ([`Iref`]) are reference counted; the last drop of an unlinked
//! inode's handle frees its blocks and its on-disk identity.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod balloc;
mod device;
mod error;
mod fs;
mod inode;
mod namecache;
pub mod param;
mod path;
mod stat;

pub use v6fs_types as types;

pub use self::{
    device::CharDevice,
    error::FsError,
    fs::{Disk, Fs, Locks},
    inode::{InodeMeta, InodeRead, InodeWrite, Iref},
    path::skip_elem,
    stat::{FileType, Stat},
};
