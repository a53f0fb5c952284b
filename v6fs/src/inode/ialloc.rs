//! On-disk inode allocation.

use v6fs_types::InodeBlock;

use crate::{
    fs::{Disk, Fs, Locks},
    inode::Iref,
    stat::FileType,
};

impl<D: Disk, L: Locks> Fs<D, L> {
    /// Allocates a free on-disk inode and types it `ty`.
    ///
    /// Returns an unlocked handle. The new inode has no links; the caller
    /// is expected to set `nlink` (and, for devices, `major`/`minor`)
    /// under the write lock and flush before the handle goes away, or the
    /// inode is reclaimed on the last put.
    pub fn ialloc(&self, dev: u32, ty: FileType) -> Iref<'_, D, L> {
        assert!(ty != FileType::Free, "ialloc: bad type");
        let sb = &self.inner.sb;

        for inum in 1..sb.ninodes {
            // optimistic check straight off the disk image
            let free = {
                let mut handle = self.inner.cache.get(sb.inode_block(inum).as_index());
                let Ok(guard) = handle.read();
                guard.data::<InodeBlock>().get(inum).is_free()
            };
            if !free {
                continue;
            }

            let ip = self.iget(dev, inum);
            {
                let mut locked = ip.lock_write();
                if locked.file_type() == FileType::Free {
                    locked.ty = ty as i16;
                    locked.major = 0;
                    locked.minor = 0;
                    locked.nlink = 0;
                    locked.size = 0;
                    locked.update();
                    drop(locked);
                    return ip;
                }
            }
            // another allocator won this inum between the check and the
            // lock; keep scanning
            log::warn!("ialloc: inode {inum} was taken, rescanning");
        }
        panic!("ialloc: out of inodes");
    }
}
