//! Data block allocator.
//!
//! One bitmap bit per block; bit 0 means free. Each bitmap block is
//! scanned and updated under its own buffer lock, so allocations in
//! different bitmap blocks proceed independently and are ordered only by
//! scan position (the lowest free block wins within a block).
//!
//! Allocation does not clear the block; [`free`] does, before it clears
//! the bit, so a racing allocator can never hand out a block that still
//! shows its previous life.

use v6fs_types::{BPB, BitmapBlock};

use crate::fs::{Disk, FsInner, Locks};

/// Allocates a block; returns its absolute block number.
pub(crate) fn alloc<D: Disk, L: Locks>(inner: &FsInner<D, L>) -> u32 {
    let sb = &inner.sb;
    let size = sb.size as usize;
    for base in (0..size).step_by(BPB) {
        let mut handle = inner.cache.get(sb.bitmap_block(base as u32).as_index());
        let Ok(mut guard) = handle.read();
        let found = (0..BPB)
            .take_while(|bi| base + bi < size)
            .find(|&bi| !guard.data::<BitmapBlock>().bit(bi));
        let Some(bi) = found else { continue };
        guard.data_mut::<BitmapBlock>().set_bit(bi);
        let Ok(()) = guard.write();
        return (base + bi) as u32;
    }
    panic!("balloc: out of blocks");
}

/// Frees a block: zero the content first, then clear the bitmap bit.
pub(crate) fn free<D: Disk, L: Locks>(inner: &FsInner<D, L>, addr: u32) {
    assert!(addr != 0 && (addr as usize) < inner.sb.size as usize, "bfree: block {addr} out of range");

    {
        let mut handle = inner.cache.get(addr as usize);
        let mut guard = handle.zeroed();
        let Ok(()) = guard.write();
    }

    let mut handle = inner.cache.get(inner.sb.bitmap_block(addr).as_index());
    let Ok(mut guard) = handle.read();
    let bi = addr as usize % BPB;
    assert!(
        guard.data::<BitmapBlock>().bit(bi),
        "bfree: block {addr} already free"
    );
    guard.data_mut::<BitmapBlock>().clear_bit(bi);
    let Ok(()) = guard.write();
}
