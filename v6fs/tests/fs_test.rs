use std::{
    sync::{
        Arc, Barrier, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use block_io::{BlockDevice as _, MemDevice};
use dataview::PodMethods as _;
use sync_api::StdLocks;
use v6fs::{
    CharDevice, FileType, Fs, FsError, Iref,
    types::{
        BPB, BSIZE, BitmapBlock, DIRENT_SIZE, Dinode, InodeBlock, NDIRECT, NINDIRECT,
        T_FREE,
    },
};

type TestFs = Fs<MemDevice<BSIZE>, StdLocks>;

const DEV: u32 = 1;
const SIZE: u32 = 1024;
const NINODES: u32 = 200;

fn fresh_fs() -> TestFs {
    let device = MemDevice::new(SIZE as usize);
    mkfs::format(&device, SIZE, NINODES).unwrap();
    Fs::new(device, DEV)
}

fn rooted_fs() -> TestFs {
    let device = MemDevice::new(SIZE as usize);
    mkfs::build(&device, SIZE, NINODES).unwrap();
    Fs::new(device, DEV)
}

/// Reads an inode straight off the device, bypassing the cache.
fn read_dinode(fs: &TestFs, inum: u32) -> Dinode {
    let mut block = [0_u8; BSIZE];
    fs.disk()
        .read(fs.superblock().inode_block(inum).as_index(), &mut block)
        .unwrap();
    let mut inodes = InodeBlock::zeroed();
    inodes
        .as_bytes_mut()
        .copy_from_slice(&block[..size_of::<InodeBlock>()]);
    *inodes.get(inum)
}

fn bitmap_bit(fs: &TestFs, addr: u32) -> bool {
    let mut block = [0_u8; BSIZE];
    fs.disk()
        .read(fs.superblock().bitmap_block(addr).as_index(), &mut block)
        .unwrap();
    let mut bm = BitmapBlock::zeroed();
    bm.as_bytes_mut().copy_from_slice(&block);
    bm.bit(addr as usize % BPB)
}

/// Allocates an inode that survives its handle being dropped.
fn make_inode(fs: &TestFs, ty: FileType) -> Iref<'_, MemDevice<BSIZE>, StdLocks> {
    let ip = fs.ialloc(DEV, ty);
    let mut locked = ip.lock_write();
    locked.nlink = 1;
    locked.update();
    drop(locked);
    ip
}

#[test]
fn ialloc_on_fresh_image() {
    let fs = fresh_fs();
    let ip = fs.ialloc(DEV, FileType::File);
    assert_eq!(ip.inum(), 1);

    let st = ip.lock_read().stat();
    assert_eq!(st.ty, FileType::File);
    assert_eq!(st.nlink, 0);
    assert_eq!(st.size, 0);

    let dip = read_dinode(&fs, ip.inum());
    assert_eq!(dip.ty, FileType::File as i16);
    assert!(dip.addrs.iter().all(|&a| a == 0));
}

#[test]
fn write_then_read_round_trip() {
    let fs = rooted_fs();
    let ip = make_inode(&fs, FileType::File);

    let mut locked = ip.lock_write();
    assert_eq!(locked.write(b"hello", 0).unwrap(), 5);

    let mut buf = [0_u8; 5];
    assert_eq!(locked.read(&mut buf, 0).unwrap(), 5);
    assert_eq!(&buf, b"hello");
    assert_eq!(locked.stat().size, 5);
}

#[test]
fn write_spills_into_indirect_block() {
    let fs = rooted_fs();
    let ip = make_inode(&fs, FileType::File);

    let data = vec![0_u8; NDIRECT * BSIZE + 10];
    let mut locked = ip.lock_write();
    assert_eq!(locked.write(&data, 0).unwrap(), data.len());
    drop(locked);

    let dip = read_dinode(&fs, ip.inum());
    let ind = dip.addrs[NDIRECT];
    assert_ne!(ind, 0);
    assert!(dip.addrs[..NDIRECT].iter().all(|&a| a != 0));

    let mut block = [0_u8; BSIZE];
    fs.disk().read(ind as usize, &mut block).unwrap();
    let entries: Vec<u32> = block
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes(c.try_into().unwrap()))
        .collect();
    assert_eq!(entries.len(), NINDIRECT);
    assert_ne!(entries[0], 0);
    assert!(entries[1..].iter().all(|&a| a == 0));
}

#[test]
fn read_clamps_and_rejects() {
    let fs = rooted_fs();
    let ip = make_inode(&fs, FileType::File);
    ip.lock_write().write(b"hello", 0).unwrap();

    let locked = ip.lock_read();
    let mut buf = [0_u8; 10];
    // reads past the end shrink
    assert_eq!(locked.read(&mut buf, 2).unwrap(), 3);
    assert_eq!(&buf[..3], b"llo");
    // reading exactly at the end is empty, beyond it is an error
    assert_eq!(locked.read(&mut buf, 5).unwrap(), 0);
    assert_eq!(locked.read(&mut buf, 6), Err(FsError::InvalidOffset));
}

#[test]
fn write_past_end_is_rejected() {
    let fs = rooted_fs();
    let ip = make_inode(&fs, FileType::File);
    let mut locked = ip.lock_write();
    locked.write(b"hello", 0).unwrap();
    assert_eq!(locked.write(b"x", 7), Err(FsError::InvalidOffset));
    // appending at the exact end is fine
    assert_eq!(locked.write(b"!", 5).unwrap(), 1);
    assert_eq!(locked.stat().size, 6);
}

#[test]
fn dirlink_then_dirlookup() {
    let fs = rooted_fs();
    let root = fs.root();

    let mut locked = root.lock_write();
    locked.link(b"a", 7).unwrap();
    let (child, off) = locked.lookup(b"a").unwrap();
    assert_eq!(child.inum(), 7);
    // the first free slot sits right after "." and ".."
    assert_eq!(off as usize, 2 * DIRENT_SIZE);
}

#[test]
fn dirlink_rejects_duplicates() {
    let fs = rooted_fs();
    let root = fs.root();

    let mut locked = root.lock_write();
    locked.link(b"a", 7).unwrap();
    assert_eq!(locked.link(b"a", 8), Err(FsError::AlreadyExists));
}

#[test]
fn namei_walks_and_normalizes() {
    let fs = rooted_fs();
    let root = fs.root();

    let a = make_inode(&fs, FileType::Dir);
    root.lock_write().link(b"a", a.inum()).unwrap();
    let b = make_inode(&fs, FileType::File);
    a.lock_write().link(b"b", b.inum()).unwrap();

    let plain = fs.namei(&root, b"/a/b").unwrap();
    assert_eq!(plain.inum(), b.inum());

    let messy = fs.namei(&root, b"///a//b").unwrap();
    assert_eq!(messy.inum(), b.inum());

    // relative lookup from a directory handle
    let rel = fs.namei(&a, b"b").unwrap();
    assert_eq!(rel.inum(), b.inum());

    // and again, to go through the name cache
    let cached = fs.namei(&root, b"/a/b").unwrap();
    assert_eq!(cached.inum(), b.inum());

    assert_eq!(
        fs.namei(&root, b"/zzz").map(|ip| ip.inum()),
        Err(FsError::NotFound)
    );
    assert_eq!(
        fs.namei(&root, b"/a/b/c").map(|ip| ip.inum()),
        Err(FsError::NotADirectory)
    );
}

#[test]
fn nameiparent_stops_one_level_early() {
    let fs = rooted_fs();
    let root = fs.root();

    let a = make_inode(&fs, FileType::Dir);
    root.lock_write().link(b"a", a.inum()).unwrap();
    let b = make_inode(&fs, FileType::File);
    a.lock_write().link(b"b", b.inum()).unwrap();

    let mut name = [0_u8; 14];
    let parent = fs.nameiparent(&root, b"/a/b", &mut name).unwrap();
    assert_eq!(parent.inum(), a.inum());
    assert_eq!(&name[..2], b"b\0");

    // the parent need not contain the final element yet
    let parent = fs.nameiparent(&root, b"/a/new", &mut name).unwrap();
    assert_eq!(parent.inum(), a.inum());
    assert_eq!(&name[..4], b"new\0");

    // the root has no parent
    assert_eq!(
        fs.nameiparent(&root, b"/", &mut name).map(|ip| ip.inum()),
        Err(FsError::NotFound)
    );
}

#[test]
fn names_truncate_at_dirent_width() {
    let fs = rooted_fs();
    let root = fs.root();

    let long = make_inode(&fs, FileType::File);
    root.lock_write()
        .link(b"abcdefghijklmn", long.inum())
        .unwrap();

    // anything beyond DIRSIZ bytes is ignored on lookup
    let found = fs.namei(&root, b"/abcdefghijklmnopq").unwrap();
    assert_eq!(found.inum(), long.inum());
}

#[test]
fn unlinked_inode_is_reclaimed_on_last_put() {
    let fs = rooted_fs();

    let (inum, generation, mut blocks) = {
        let ip = fs.ialloc(DEV, FileType::File);
        let data = vec![0xa5_u8; NDIRECT * BSIZE + 3 * BSIZE];
        ip.lock_write().write(&data, 0).unwrap();

        let dip = read_dinode(&fs, ip.inum());
        let mut blocks: Vec<u32> = dip.addrs.iter().copied().filter(|&a| a != 0).collect();
        let mut ind = [0_u8; BSIZE];
        fs.disk().read(dip.addrs[NDIRECT] as usize, &mut ind).unwrap();
        blocks.extend(
            ind.chunks_exact(4)
                .map(|c| u32::from_ne_bytes(c.try_into().unwrap()))
                .filter(|&a| a != 0),
        );
        assert_eq!(blocks.len(), NDIRECT + 1 + 3);
        for &b in &blocks {
            assert!(bitmap_bit(&fs, b), "block {b} must be allocated");
        }
        (ip.inum(), ip.generation(), blocks)
        // `ip` drops here with nlink == 0: the last put reclaims it
    };

    let dip = read_dinode(&fs, inum);
    assert_eq!(dip.ty, T_FREE);
    assert_eq!(dip.generation, generation + 1);
    assert_eq!(dip.size, 0);
    assert!(dip.addrs.iter().all(|&a| a == 0));

    blocks.sort_unstable();
    for b in blocks {
        assert!(!bitmap_bit(&fs, b), "block {b} must be free again");
    }
}

#[test]
fn metadata_survives_eviction() {
    let fs = rooted_fs();
    let inum = {
        let ip = make_inode(&fs, FileType::File);
        ip.lock_write().write(b"persist", 0).unwrap();
        ip.inum()
    };

    // cycle enough inodes through the cache to evict it
    for _ in 0..60 {
        let ip = make_inode(&fs, FileType::File);
        drop(ip);
    }

    let ip = fs.iget(DEV, inum);
    let locked = ip.lock_read();
    let st = locked.stat();
    assert_eq!(st.ty, FileType::File);
    assert_eq!(st.nlink, 1);
    assert_eq!(st.size, 7);
    let mut buf = [0_u8; 7];
    locked.read(&mut buf, 0).unwrap();
    assert_eq!(&buf, b"persist");
}

#[test]
fn readers_share_the_lock() {
    let fs = rooted_fs();
    let root = fs.root();
    let both_in = Barrier::new(2);

    thread::scope(|s| {
        for _ in 0..2 {
            s.spawn(|| {
                let _locked = root.lock_read();
                // both threads sit inside the lock at once; if readers
                // excluded each other this would deadlock
                both_in.wait();
            });
        }
    });
}

#[test]
fn writer_waits_for_readers() {
    let fs = rooted_fs();
    let root = fs.root();
    let released = AtomicBool::new(false);

    thread::scope(|s| {
        let reader = root.lock_read();
        let writer = s.spawn(|| {
            let _locked = root.lock_write();
            assert!(
                released.load(Ordering::SeqCst),
                "writer got the lock while a reader held it"
            );
        });

        thread::sleep(Duration::from_millis(50));
        released.store(true, Ordering::SeqCst);
        drop(reader);
        writer.join().unwrap();
    });
}

#[test]
fn reader_waits_for_writer() {
    let fs = rooted_fs();
    let root = fs.root();
    let released = AtomicBool::new(false);

    thread::scope(|s| {
        let writer = root.lock_write();
        let reader = s.spawn(|| {
            let _locked = root.lock_read();
            assert!(
                released.load(Ordering::SeqCst),
                "reader got the lock while the writer held it"
            );
        });

        thread::sleep(Duration::from_millis(50));
        released.store(true, Ordering::SeqCst);
        drop(writer);
        reader.join().unwrap();
    });
}

struct Loopback {
    expect_minor: i16,
    data: Mutex<Vec<u8>>,
}

impl CharDevice for Loopback {
    fn read(&self, minor: i16, dst: &mut [u8]) -> Result<usize, FsError> {
        assert_eq!(minor, self.expect_minor);
        let data = self.data.lock().unwrap();
        let n = usize::min(dst.len(), data.len());
        dst[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn write(&self, minor: i16, src: &[u8]) -> Result<usize, FsError> {
        assert_eq!(minor, self.expect_minor);
        self.data.lock().unwrap().extend_from_slice(src);
        Ok(src.len())
    }
}

#[test]
fn device_inodes_dispatch_by_major() {
    let fs = rooted_fs();
    fs.register_device(
        3,
        Arc::new(Loopback {
            expect_minor: 7,
            data: Mutex::new(Vec::new()),
        }),
    );

    let ip = fs.ialloc(DEV, FileType::Device);
    {
        let mut locked = ip.lock_write();
        locked.major = 3;
        locked.minor = 7;
        locked.nlink = 1;
        locked.update();
    }

    let mut locked = ip.lock_write();
    assert_eq!(locked.write(b"ping", 0).unwrap(), 4);
    let mut buf = [0_u8; 8];
    assert_eq!(locked.read(&mut buf, 0).unwrap(), 4);
    assert_eq!(&buf[..4], b"ping");
}

#[test]
fn unconfigured_major_is_an_error() {
    let fs = rooted_fs();
    let ip = fs.ialloc(DEV, FileType::Device);
    {
        let mut locked = ip.lock_write();
        locked.major = 9;
        locked.nlink = 1;
        locked.update();
    }

    let mut buf = [0_u8; 4];
    assert_eq!(ip.lock_read().read(&mut buf, 0), Err(FsError::NoDevice));
}
