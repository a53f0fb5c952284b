//! File system image formatter.
//!
//! [`format`] lays down an empty file system: superblock, zeroed inode
//! table, and a bitmap that already accounts for the metadata region.
//! [`build`] additionally creates the root directory. Both work directly
//! on a [`BlockDevice`], bypassing any buffer cache; an image is built
//! before the file system is mounted.

use dataview::PodMethods as _;

use block_io::BlockDevice;
use v6fs_types::{
    BPB, BSIZE, BitmapBlock, BlockNo, Dinode, Dirent, InodeBlock, SuperBlock, T_DIR,
};

mod file_device;

pub use self::file_device::FileDevice;

/// The root directory's inode number.
pub const ROOT_INUM: u32 = 1;

fn write_pod<D, T>(device: &D, block: u32, value: &T) -> Result<(), D::Error>
where
    D: BlockDevice<BSIZE>,
    T: dataview::Pod,
{
    let mut bytes = [0_u8; BSIZE];
    bytes[..size_of::<T>()].copy_from_slice(value.as_bytes());
    device.write(block as usize, &bytes)
}

/// Marks blocks `[0, until)` as allocated in the bitmap.
fn preseed_bitmap<D>(device: &D, sb: &SuperBlock, until: u32) -> Result<(), D::Error>
where
    D: BlockDevice<BSIZE>,
{
    for first in (0..until).step_by(BPB) {
        let mut bm = BitmapBlock::zeroed();
        for b in first..u32::min(first + BPB as u32, until) {
            bm.set_bit(b as usize % BPB);
        }
        write_pod(device, sb.bitmap_block(first).value(), &bm)?;
    }
    Ok(())
}

/// Writes an empty file system of `size` blocks and `ninodes` inodes.
///
/// Every block is zeroed first, so freshly allocated blocks start out
/// zero-filled even though the allocator itself never clears them.
pub fn format<D>(device: &D, size: u32, ninodes: u32) -> Result<SuperBlock, D::Error>
where
    D: BlockDevice<BSIZE>,
{
    let sb = SuperBlock { size, ninodes };
    assert!(ninodes >= 1, "mkfs: need at least one inode");
    assert!(
        u64::from(ninodes) <= u64::from(u16::MAX),
        "mkfs: inode numbers must fit a directory entry"
    );
    assert!(
        sb.data_start().value() < size,
        "mkfs: {size} blocks leave no room for data"
    );

    let zero = [0_u8; BSIZE];
    for b in 0..size {
        device.write(b as usize, &zero)?;
    }

    write_pod(device, BlockNo::SUPER.value(), &sb)?;
    preseed_bitmap(device, &sb, sb.data_start().value())?;
    Ok(sb)
}

/// Like [`format`], but also creates the root directory (inode
/// [`ROOT_INUM`], entries `.` and `..`).
pub fn build<D>(device: &D, size: u32, ninodes: u32) -> Result<SuperBlock, D::Error>
where
    D: BlockDevice<BSIZE>,
{
    let sb = format(device, size, ninodes)?;

    // claim the first data block for the root directory's content
    let content = sb.data_start().value();
    let mut bm = BitmapBlock::zeroed();
    read_pod(device, sb.bitmap_block(content).value(), &mut bm)?;
    bm.set_bit(content as usize % BPB);
    write_pod(device, sb.bitmap_block(content).value(), &bm)?;

    let mut bytes = [0_u8; BSIZE];
    let dot = Dirent::new(ROOT_INUM as u16, b".");
    let dotdot = Dirent::new(ROOT_INUM as u16, b"..");
    bytes[..size_of::<Dirent>()].copy_from_slice(dot.as_bytes());
    bytes[size_of::<Dirent>()..2 * size_of::<Dirent>()].copy_from_slice(dotdot.as_bytes());
    device.write(content as usize, &bytes)?;

    let mut inodes = InodeBlock::zeroed();
    read_pod(device, sb.inode_block(ROOT_INUM).value(), &mut inodes)?;
    let root = inodes.get_mut(ROOT_INUM);
    *root = Dinode::zeroed();
    root.ty = T_DIR;
    root.nlink = 2;
    root.size = (2 * size_of::<Dirent>()) as u32;
    root.addrs[0] = content;
    write_pod(device, sb.inode_block(ROOT_INUM).value(), &inodes)?;

    Ok(sb)
}

fn read_pod<D, T>(device: &D, block: u32, value: &mut T) -> Result<(), D::Error>
where
    D: BlockDevice<BSIZE>,
    T: dataview::Pod,
{
    let mut bytes = [0_u8; BSIZE];
    device.read(block as usize, &mut bytes)?;
    value.as_bytes_mut().copy_from_slice(&bytes[..size_of::<T>()]);
    Ok(())
}
