//! Inodes.
//!
//! An inode describes a single unnamed file: its type, link count, size,
//! and the list of blocks holding its content. On disk, inodes are packed
//! into the table starting at block 2; in memory, a fixed pool of cache
//! slots mirrors the inodes in active use.
//!
//! An in-memory slot goes through these states:
//!
//! * **Referenced**: `refs` counts the live [`Iref`] handles. A slot with
//!   `refs == 0` may be evicted to cache a different inode. Handles are
//!   obtained from [`crate::Fs::iget`] and duplicated by cloning.
//!
//! * **Valid**: the metadata mirror matches the on-disk image once the
//!   `VALID` flag is set; it is set exactly once in a slot's lifetime, by
//!   the thread that loaded the slot.
//!
//! * **Locked**: the content lock (`BUSYR`/`BUSYW` plus the `readbusy`
//!   count) guards the mirror and the file content. It is not the slot's
//!   mutex: that one only protects the flag word itself and is never held
//!   across I/O, while the content lock routinely is. Any number of
//!   readers may hold the lock together; a writer is exclusive.
//!
//! Lock ordering is strict: path lookup holds at most one content lock at
//! a time, releasing the parent before locking the child, so walkers
//! crossing in opposite directions cannot deadlock.
//!
//! Dropping the last handle of an inode with no links frees its content
//! and its on-disk identity (type cleared, generation bumped).

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    ptr::NonNull,
    sync::atomic::{AtomicU32, Ordering::SeqCst},
};

use alloc::boxed::Box;

use bitflags::bitflags;
use sync_api::{Condvar, LockFamily, Mutex};
use v6fs_types::{NDIRECT, T_FREE};

use crate::{
    fs::{Disk, Fs, Locks},
    stat::FileType,
};

pub(crate) mod content;
pub(crate) mod directory;
pub(crate) mod ialloc;
pub(crate) mod table;

bitflags! {
    /// Slot state bits.
    ///
    /// `BUSYR`/`BUSYW` are the content lock; `FREE` marks a slot claimed
    /// by an evictor; `VALID` is set once the mirror holds the on-disk
    /// image and is never cleared afterwards.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct SlotFlags: u8 {
        const VALID = 1 << 0;
        const BUSYR = 1 << 1;
        const BUSYW = 1 << 2;
        const FREE = 1 << 3;
    }
}

pub(crate) struct SlotState {
    pub(crate) flags: SlotFlags,
    /// Content lock holders: 1 while `BUSYW` is set, else the reader count.
    pub(crate) readbusy: u32,
}

/// In-memory mirror of the on-disk inode metadata.
///
/// Reachable only through a lock guard; writes require the write guard.
/// Changes live only in memory until [`InodeWrite::update`] copies them
/// back to the inode table.
pub struct InodeMeta {
    pub ty: i16,
    pub major: i16,
    pub minor: i16,
    pub nlink: i16,
    pub size: u32,
}

impl InodeMeta {
    /// Decodes the type field; corrupt values are fatal.
    #[must_use]
    pub fn file_type(&self) -> FileType {
        FileType::from_disk(self.ty)
    }
}

/// One inode cache slot.
///
/// Owned by the cache's namespace; eviction unlinks a slot and hands its
/// storage to the reclamation domain, so a pointer fetched inside a
/// read-side section stays dereferenceable until the section ends.
pub(crate) struct Slot<L: Locks> {
    /// Cache key: the inum, or a negative placeholder. Immutable.
    pub(crate) key: i32,
    /// Owning device. Immutable.
    pub(crate) dev: u32,
    /// Live handle count. Grows only inside a read-side section (lookup)
    /// or by duplicating an existing handle.
    pub(crate) refs: AtomicU32,
    /// Bumped each time this inode's on-disk identity is reclaimed.
    pub(crate) generation: AtomicU32,
    pub(crate) state: <L as LockFamily>::Lock<SlotState>,
    pub(crate) cond: L::Condvar<SlotState>,
    /// Guarded by the content lock, not by `state`.
    pub(crate) body: UnsafeCell<InodeMeta>,
    /// Block map mirror. Truncation rewrites it under the write lock, but
    /// a reader filling a hole installs an address under the read lock,
    /// so the entries are atomics.
    pub(crate) addrs: [AtomicU32; NDIRECT + 1],
}

// The UnsafeCell is published across threads; the flag protocol is what
// keeps its accesses exclusive.
unsafe impl<L: Locks> Send for Slot<L> {}
unsafe impl<L: Locks> Sync for Slot<L> {}

impl<L: Locks> Slot<L> {
    fn new(key: i32, dev: u32, refs: u32, flags: SlotFlags, readbusy: u32) -> Box<Self> {
        Box::new(Self {
            key,
            dev,
            refs: AtomicU32::new(refs),
            generation: AtomicU32::new(0),
            state: Mutex::new(SlotState { flags, readbusy }),
            cond: Condvar::new(),
            body: UnsafeCell::new(InodeMeta {
                ty: T_FREE,
                major: 0,
                minor: 0,
                nlink: 0,
                size: 0,
            }),
            addrs: [const { AtomicU32::new(0) }; NDIRECT + 1],
        })
    }

    /// An unreferenced, invalid slot; pure eviction fodder.
    pub(crate) fn new_placeholder(key: i32, dev: u32) -> Box<Self> {
        assert!(key < 0, "placeholder slots use negative keys");
        Self::new(key, dev, 0, SlotFlags::empty(), 0)
    }

    /// A slot born referenced and write-locked, ready for its disk read.
    pub(crate) fn new_loading(key: i32, dev: u32) -> Box<Self> {
        Self::new(key, dev, 1, SlotFlags::BUSYR | SlotFlags::BUSYW, 1)
    }
}

/// A shared pointer to a cache slot.
pub(crate) struct SlotPtr<L: Locks>(NonNull<Slot<L>>);

impl<L: Locks> Clone for SlotPtr<L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L: Locks> Copy for SlotPtr<L> {}

impl<L: Locks> PartialEq for SlotPtr<L> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

unsafe impl<L: Locks> Send for SlotPtr<L> {}
unsafe impl<L: Locks> Sync for SlotPtr<L> {}

impl<L: Locks> SlotPtr<L> {
    pub(crate) fn publish(slot: Box<Slot<L>>) -> Self {
        Self(Box::leak(slot).into())
    }

    /// # Safety
    ///
    /// The slot must still be alive: the caller holds a reference counted
    /// in `refs`, or is inside a read-side section of the cache's
    /// reclamation domain, or owns the only pointer to an unpublished
    /// slot.
    pub(crate) unsafe fn as_ref<'a>(self) -> &'a Slot<L> {
        unsafe { self.0.as_ref() }
    }

    /// # Safety
    ///
    /// The slot must be unreachable: removed from the namespace, with no
    /// handle and no read-side section able to observe it.
    pub(crate) unsafe fn reclaim(self) {
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }
}

/// Acquires the content lock.
pub(crate) fn lock_slot<L: Locks>(slot: &Slot<L>, writer: bool) {
    let mut st = slot.state.lock();
    while st.flags.contains(SlotFlags::BUSYW)
        || (writer && st.flags.contains(SlotFlags::BUSYR))
    {
        st = slot.cond.wait(st);
    }
    st.flags.insert(SlotFlags::BUSYR);
    if writer {
        st.flags.insert(SlotFlags::BUSYW);
    }
    st.readbusy += 1;
}

/// Releases the content lock (either mode) and wakes all waiters.
pub(crate) fn unlock_slot<L: Locks>(slot: &Slot<L>) {
    {
        let mut st = slot.state.lock();
        assert!(st.readbusy > 0, "inode: unlock without lock");
        st.readbusy -= 1;
        st.flags.remove(SlotFlags::BUSYW);
        if st.readbusy == 0 {
            st.flags.remove(SlotFlags::BUSYR);
        }
    }
    slot.cond.notify_all();
}

/// A reference-counted handle on a cached inode.
///
/// Cloning duplicates the handle. Dropping the last handle of an inode
/// with `nlink == 0` frees the file's content and its on-disk identity.
///
/// The handle itself only exposes the immutable identity (`dev`, `inum`,
/// `generation`); everything else requires taking the content lock via
/// [`Iref::lock_read`] or [`Iref::lock_write`].
pub struct Iref<'fs, D: Disk, L: Locks> {
    fs: &'fs Fs<D, L>,
    ptr: SlotPtr<L>,
}

unsafe impl<D: Disk, L: Locks> Send for Iref<'_, D, L> {}
unsafe impl<D: Disk, L: Locks> Sync for Iref<'_, D, L> {}

impl<'fs, D: Disk, L: Locks> Iref<'fs, D, L> {
    /// A handle for a slot whose `refs` already counts it.
    pub(crate) fn adopt(fs: &'fs Fs<D, L>, ptr: SlotPtr<L>) -> Self {
        Self { fs, ptr }
    }

    pub(crate) fn fs(&self) -> &'fs Fs<D, L> {
        self.fs
    }

    pub(crate) fn slot(&self) -> &Slot<L> {
        // refs >= 1 keeps the slot out of eviction's hands
        unsafe { self.ptr.as_ref() }
    }

    pub fn dev(&self) -> u32 {
        self.slot().dev
    }

    pub fn inum(&self) -> u32 {
        self.slot().key as u32
    }

    pub fn generation(&self) -> u32 {
        self.slot().generation.load(SeqCst)
    }

    /// Takes the content lock shared.
    pub fn lock_read(&self) -> InodeRead<'_, 'fs, D, L> {
        lock_slot(self.slot(), false);
        InodeRead { ip: self }
    }

    /// Takes the content lock exclusive.
    pub fn lock_write(&self) -> InodeWrite<'_, 'fs, D, L> {
        lock_slot(self.slot(), true);
        InodeWrite { ip: self }
    }

    /// Releases the handle (the destructor does the work).
    pub fn put(self) {}
}

impl<D: Disk, L: Locks> Clone for Iref<'_, D, L> {
    fn clone(&self) -> Self {
        self.slot().refs.fetch_add(1, SeqCst);
        Self {
            fs: self.fs,
            ptr: self.ptr,
        }
    }
}

impl<D: Disk, L: Locks> Drop for Iref<'_, D, L> {
    fn drop(&mut self) {
        // The section keeps the slot's storage alive through the tail of
        // this function: once refs hits 0 an evictor may free it at any
        // quiescent point.
        let _section = self.fs.inner.qdom.read_enter();

        let slot = self.slot();
        if slot.refs.fetch_sub(1, SeqCst) != 1 {
            return;
        }

        // Last handle gone; reclaim the on-disk inode if it is unlinked.
        {
            let mut st = slot.state.lock();
            if slot.refs.load(SeqCst) != 0
                || !st.flags.contains(SlotFlags::VALID)
                || st.flags.intersects(SlotFlags::BUSYR | SlotFlags::BUSYW)
            {
                return;
            }
            // No holder and no handle means no one can race us for the
            // content lock; take it for writing on the spot.
            let nlink = unsafe { (*slot.body.get()).nlink };
            if nlink != 0 {
                return;
            }
            st.flags.insert(SlotFlags::BUSYR | SlotFlags::BUSYW);
            st.readbusy += 1;
        }

        let meta = unsafe { &mut *slot.body.get() };
        content::truncate(self, meta);
        meta.ty = T_FREE;
        meta.major = 0;
        meta.minor = 0;
        slot.generation.fetch_add(1, SeqCst);
        content::update(self, meta);
        unlock_slot(slot);
    }
}

/// Shared (reader) guard on an inode's content lock.
///
/// Dereferences to the metadata mirror. May be held across disk I/O.
pub struct InodeRead<'ip, 'fs, D: Disk, L: Locks> {
    pub(crate) ip: &'ip Iref<'fs, D, L>,
}

impl<D: Disk, L: Locks> Deref for InodeRead<'_, '_, D, L> {
    type Target = InodeMeta;

    fn deref(&self) -> &InodeMeta {
        // shared access: BUSYR holders exclude any writer
        unsafe { &*self.ip.slot().body.get() }
    }
}

impl<D: Disk, L: Locks> Drop for InodeRead<'_, '_, D, L> {
    fn drop(&mut self) {
        unlock_slot(self.ip.slot());
    }
}

impl<D: Disk, L: Locks> InodeRead<'_, '_, D, L> {
    /// Releases the lock (the destructor does the work).
    pub fn unlock(self) {}
}

/// Exclusive (writer) guard on an inode's content lock.
pub struct InodeWrite<'ip, 'fs, D: Disk, L: Locks> {
    pub(crate) ip: &'ip Iref<'fs, D, L>,
}

impl<D: Disk, L: Locks> Deref for InodeWrite<'_, '_, D, L> {
    type Target = InodeMeta;

    fn deref(&self) -> &InodeMeta {
        unsafe { &*self.ip.slot().body.get() }
    }
}

impl<D: Disk, L: Locks> DerefMut for InodeWrite<'_, '_, D, L> {
    fn deref_mut(&mut self) -> &mut InodeMeta {
        // exclusive access: BUSYW excludes every other holder
        unsafe { &mut *self.ip.slot().body.get() }
    }
}

impl<D: Disk, L: Locks> Drop for InodeWrite<'_, '_, D, L> {
    fn drop(&mut self) {
        unlock_slot(self.ip.slot());
    }
}

impl<D: Disk, L: Locks> InodeWrite<'_, '_, D, L> {
    /// Releases the lock (the destructor does the work).
    pub fn unlock(self) {}
}
