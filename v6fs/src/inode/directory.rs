//! Directories.
//!
//! A directory is an inode whose content is an array of fixed-width
//! entries; an entry with inum 0 is an empty slot. Names are at most
//! `DIRSIZ` bytes and carry no terminator at full width, so every
//! comparison is width-bounded. Entries are never compacted.

use dataview::PodMethods as _;
use v6fs_types::{DIRENT_SIZE, Dirent};

use crate::{
    error::FsError,
    fs::{Disk, Locks},
    inode::{InodeMeta, InodeRead, InodeWrite, Iref, content},
    stat::FileType,
};

fn read_entry<D: Disk, L: Locks>(
    ip: &Iref<'_, D, L>,
    meta: &InodeMeta,
    off: u32,
) -> Result<Dirent, FsError> {
    let mut de = Dirent::zeroed();
    let n = content::read_at(ip, meta, de.as_bytes_mut(), off)?;
    assert_eq!(n, DIRENT_SIZE, "dirent: short read at offset {off}");
    Ok(de)
}

/// Looks `name` up in the directory.
///
/// Returns an unlocked handle on the named inode and the entry's byte
/// offset.
pub(crate) fn lookup<'fs, D: Disk, L: Locks>(
    ip: &Iref<'fs, D, L>,
    meta: &InodeMeta,
    name: &[u8],
) -> Result<(Iref<'fs, D, L>, u32), FsError> {
    assert_eq!(meta.file_type(), FileType::Dir, "dirlookup: not a directory");
    assert_eq!(
        meta.size as usize % DIRENT_SIZE,
        0,
        "dirlookup: ragged directory"
    );

    let mut off = 0;
    while off < meta.size {
        let de = read_entry(ip, meta, off)?;
        if de.inum() != 0 && de.name_matches(name) {
            let child = ip.fs().iget(ip.dev(), u32::from(de.inum()));
            return Ok((child, off));
        }
        off += DIRENT_SIZE as u32;
    }
    Err(FsError::NotFound)
}

/// Adds the entry `name -> inum`, reusing the first empty slot.
pub(crate) fn link<D: Disk, L: Locks>(
    ip: &Iref<'_, D, L>,
    meta: &mut InodeMeta,
    name: &[u8],
    inum: u32,
) -> Result<(), FsError> {
    match lookup(ip, meta, name) {
        Ok((_existing, _off)) => return Err(FsError::AlreadyExists),
        Err(FsError::NotFound) => {}
        Err(e) => return Err(e),
    }

    let mut off = 0;
    while off < meta.size {
        if read_entry(ip, meta, off)?.inum() == 0 {
            break;
        }
        off += DIRENT_SIZE as u32;
    }

    assert!(inum <= u32::from(u16::MAX), "dirlink: inum {inum} too large");
    let de = Dirent::new(inum as u16, name);
    let n = content::write_at(ip, meta, de.as_bytes(), off)?;
    assert_eq!(n, DIRENT_SIZE, "dirlink: short write at offset {off}");
    Ok(())
}

impl<'fs, D: Disk, L: Locks> InodeRead<'_, 'fs, D, L> {
    /// Looks `name` up in this directory; see [`InodeWrite::link`] for
    /// the insert side.
    pub fn lookup(&self, name: &[u8]) -> Result<(Iref<'fs, D, L>, u32), FsError> {
        lookup(self.ip, self, name)
    }
}

impl<'fs, D: Disk, L: Locks> InodeWrite<'_, 'fs, D, L> {
    /// Looks `name` up in this directory.
    pub fn lookup(&self, name: &[u8]) -> Result<(Iref<'fs, D, L>, u32), FsError> {
        lookup(self.ip, self, name)
    }

    /// Binds `name` to `inum` in this directory.
    ///
    /// Holding the write lock across a preceding [`InodeWrite::lookup`]
    /// and this call is what makes create() atomic.
    pub fn link(&mut self, name: &[u8], inum: u32) -> Result<(), FsError> {
        let ip = self.ip;
        link(ip, &mut **self, name, inum)
    }
}
