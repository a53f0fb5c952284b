//! Inode content.
//!
//! A file's bytes live in blocks named by the inode's address array: the
//! first `NDIRECT` entries directly, the rest through a single indirect
//! block. Addresses are allocated lazily, on first touch; a hole read
//! before it is written sees whatever the freshly allocated block last
//! held (blocks are zeroed when freed, so in practice: zeros).

use core::sync::atomic::Ordering::SeqCst;

use alloc::sync::Arc;

use v6fs_types::{BSIZE, IndirectBlock, InodeBlock, MAX_FILE, NDIRECT, NINDIRECT};

use crate::{
    balloc,
    error::FsError,
    fs::{Disk, Fs, Locks},
    inode::{InodeMeta, InodeRead, InodeWrite, Iref},
    stat::{FileType, Stat},
};

/// Returns the device block backing file block `n`, allocating as needed.
///
/// Sets `*allocated` when the block map changed, so the caller knows the
/// on-disk inode is stale.
pub(crate) fn block_map<D: Disk, L: Locks>(
    ip: &Iref<'_, D, L>,
    n: usize,
    allocated: &mut bool,
) -> u32 {
    let inner = &ip.fs().inner;
    let slot = ip.slot();

    if n < NDIRECT {
        let addr = slot.addrs[n].load(SeqCst);
        if addr != 0 {
            return addr;
        }
        let fresh = balloc::alloc(inner);
        return match slot.addrs[n].compare_exchange(0, fresh, SeqCst, SeqCst) {
            Ok(_) => {
                *allocated = true;
                fresh
            }
            Err(winner) => {
                // another reader filled this hole first; our block was
                // never published, so free it on the spot
                balloc::free(inner, fresh);
                winner
            }
        };
    }

    let idx = n - NDIRECT;
    assert!(idx < NINDIRECT, "bmap: block {n} out of range");

    let ind = {
        let addr = slot.addrs[NDIRECT].load(SeqCst);
        if addr != 0 {
            addr
        } else {
            let fresh = balloc::alloc(inner);
            match slot.addrs[NDIRECT].compare_exchange(0, fresh, SeqCst, SeqCst) {
                Ok(_) => {
                    *allocated = true;
                    fresh
                }
                Err(winner) => {
                    balloc::free(inner, fresh);
                    winner
                }
            }
        }
    };

    // The indirect block's buffer lock serializes entry installation.
    let mut handle = inner.cache.get(ind as usize);
    let Ok(mut guard) = handle.read();
    let addr = guard.data::<IndirectBlock>().get(idx);
    if addr != 0 {
        return addr;
    }
    let fresh = balloc::alloc(inner);
    guard.data_mut::<IndirectBlock>().set(idx, fresh);
    let Ok(()) = guard.write();
    *allocated = true;
    fresh
}

/// Reads up to `dst.len()` bytes at `off`; returns the number read.
pub(crate) fn read_at<D: Disk, L: Locks>(
    ip: &Iref<'_, D, L>,
    meta: &InodeMeta,
    dst: &mut [u8],
    off: u32,
) -> Result<usize, FsError> {
    if meta.file_type() == FileType::Device {
        return ip.fs().char_device(meta.major)?.read(meta.minor, dst);
    }

    let size = meta.size as usize;
    let off = off as usize;
    let Some(end) = off.checked_add(dst.len()) else {
        return Err(FsError::InvalidOffset);
    };
    if off > size {
        return Err(FsError::InvalidOffset);
    }
    let n = usize::min(end, size) - off;

    let inner = &ip.fs().inner;
    let mut allocated = false;
    let mut tot = 0;
    while tot < n {
        let pos = off + tot;
        let addr = block_map(ip, pos / BSIZE, &mut allocated);
        let mut handle = inner.cache.get(addr as usize);
        let Ok(guard) = handle.read();
        let m = usize::min(n - tot, BSIZE - pos % BSIZE);
        dst[tot..tot + m].copy_from_slice(&guard.bytes()[pos % BSIZE..][..m]);
        tot += m;
    }

    if allocated {
        // reading a hole grew the block map
        update(ip, meta);
    }
    Ok(tot)
}

/// Writes `src` at `off`; returns the number of bytes written.
pub(crate) fn write_at<D: Disk, L: Locks>(
    ip: &Iref<'_, D, L>,
    meta: &mut InodeMeta,
    src: &[u8],
    off: u32,
) -> Result<usize, FsError> {
    if meta.file_type() == FileType::Device {
        return ip.fs().char_device(meta.major)?.write(meta.minor, src);
    }

    let size = meta.size as usize;
    let off = off as usize;
    let Some(end) = off.checked_add(src.len()) else {
        return Err(FsError::InvalidOffset);
    };
    if off > size {
        return Err(FsError::InvalidOffset);
    }
    let n = usize::min(end, MAX_FILE * BSIZE).saturating_sub(off);

    let inner = &ip.fs().inner;
    let mut allocated = false;
    let mut tot = 0;
    while tot < n {
        let pos = off + tot;
        let addr = block_map(ip, pos / BSIZE, &mut allocated);
        let mut handle = inner.cache.get(addr as usize);
        let Ok(mut guard) = handle.read();
        let m = usize::min(n - tot, BSIZE - pos % BSIZE);
        guard.bytes_mut()[pos % BSIZE..][..m].copy_from_slice(&src[tot..tot + m]);
        let Ok(()) = guard.write();
        tot += m;
    }

    if off + tot > size {
        meta.size = (off + tot) as u32;
    }
    // flush even when the size did not change: the loop may have grown
    // the block map
    update(ip, meta);
    Ok(tot)
}

/// Copies the mirror back into the on-disk inode and writes the block.
pub(crate) fn update<D: Disk, L: Locks>(ip: &Iref<'_, D, L>, meta: &InodeMeta) {
    let inner = &ip.fs().inner;
    let slot = ip.slot();

    let mut handle = inner.cache.get(inner.sb.inode_block(ip.inum()).as_index());
    let Ok(mut guard) = handle.read();
    let dip = guard.data_mut::<InodeBlock>().get_mut(ip.inum());
    dip.ty = meta.ty;
    dip.major = meta.major;
    dip.minor = meta.minor;
    dip.nlink = meta.nlink;
    dip.size = meta.size;
    dip.generation = slot.generation.load(SeqCst);
    for (dst, src) in dip.addrs.iter_mut().zip(&slot.addrs) {
        *dst = src.load(SeqCst);
    }
    let Ok(()) = guard.write();
}

/// Discards the file's content.
///
/// The blocks go through the reclamation domain rather than straight back
/// to the allocator: a reader that captured an address before the
/// truncation must not see the block recycled under it.
pub(crate) fn truncate<D: Disk, L: Locks>(ip: &Iref<'_, D, L>, meta: &mut InodeMeta) {
    let fs = ip.fs();
    let slot = ip.slot();

    for entry in &slot.addrs[..NDIRECT] {
        let addr = entry.swap(0, SeqCst);
        if addr != 0 {
            defer_free(fs, addr);
        }
    }

    let ind = slot.addrs[NDIRECT].swap(0, SeqCst);
    if ind != 0 {
        {
            let mut handle = fs.inner.cache.get(ind as usize);
            let Ok(mut guard) = handle.read();
            for addr in guard.data_mut::<IndirectBlock>().drain() {
                defer_free(fs, addr);
            }
        }
        defer_free(fs, ind);
    }

    meta.size = 0;
    update(ip, meta);
}

fn defer_free<D: Disk, L: Locks>(fs: &Fs<D, L>, addr: u32) {
    let inner = Arc::clone(&fs.inner);
    fs.inner
        .qdom
        .defer(move || balloc::free(&inner, addr));
}

impl<D: Disk, L: Locks> InodeRead<'_, '_, D, L> {
    /// Reads up to `dst.len()` bytes of content at byte offset `off`.
    ///
    /// Short reads happen at end of file; device inodes dispatch to the
    /// registered driver instead.
    pub fn read(&self, dst: &mut [u8], off: u32) -> Result<usize, FsError> {
        read_at(self.ip, self, dst, off)
    }

    /// Metadata snapshot.
    pub fn stat(&self) -> Stat {
        stat_of(self.ip, self)
    }
}

impl<D: Disk, L: Locks> InodeWrite<'_, '_, D, L> {
    /// Reads up to `dst.len()` bytes of content at byte offset `off`.
    pub fn read(&self, dst: &mut [u8], off: u32) -> Result<usize, FsError> {
        read_at(self.ip, self, dst, off)
    }

    /// Writes `src` at byte offset `off`, extending the file as needed.
    ///
    /// The write is clamped at the file size limit; the returned count is
    /// short when it hit the limit.
    pub fn write(&mut self, src: &[u8], off: u32) -> Result<usize, FsError> {
        let ip = self.ip;
        write_at(ip, &mut **self, src, off)
    }

    /// Flushes the metadata mirror to the on-disk inode.
    ///
    /// Call after changing any field through the guard.
    pub fn update(&self) {
        update(self.ip, self);
    }

    /// Discards the file's content and flushes.
    pub(crate) fn truncate(&mut self) {
        let ip = self.ip;
        truncate(ip, &mut **self);
    }

    /// Metadata snapshot.
    pub fn stat(&self) -> Stat {
        stat_of(self.ip, self)
    }
}

fn stat_of<D: Disk, L: Locks>(ip: &Iref<'_, D, L>, meta: &InodeMeta) -> Stat {
    Stat {
        dev: ip.dev(),
        ino: ip.inum(),
        ty: meta.file_type(),
        nlink: meta.nlink,
        size: meta.size,
    }
}
