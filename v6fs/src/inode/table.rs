//! The inode cache.
//!
//! A fixed pool of [`Slot`]s indexed by a [`Namespace`] keyed on the
//! inum. The table is pre-populated with placeholder slots under negative
//! keys, so it is always at capacity and caching a new inode always means
//! evicting an idle slot.
//!
//! Lookup runs inside a read-side section and takes no table-wide lock;
//! eviction removes the victim from the namespace and hands its storage
//! to the reclamation domain, which delays the free past every section
//! that might still hold the pointer. The `bump refs, then check FREE`
//! sequence on the lookup side pairs with the evictor's `check refs, mark
//! FREE, re-check refs` sequence: whichever move lands second sees the
//! other's and backs off.

use core::sync::atomic::{AtomicI32, Ordering::SeqCst};

use alloc::vec::Vec;

use namespace::{Entries, InsertError, Namespace};
use sync_api::{Condvar as _, LockFamily, Mutex as _};
use v6fs_types::InodeBlock;

use crate::{
    fs::{Disk, Fs, Locks},
    inode::{Iref, Slot, SlotFlags, SlotPtr, unlock_slot},
    param::NINODE,
};

pub(crate) type TableNs<L> =
    Namespace<<L as LockFamily>::Lock<Entries<i32, SlotPtr<L>, NINODE>>>;

pub(crate) struct Itable<L: Locks> {
    pub(crate) ns: TableNs<L>,
    /// Key for the next placeholder slot; counts down from
    /// `-(NINODE + 1)` so it never collides with the initial
    /// placeholders or a real inum.
    placeholder_key: AtomicI32,
}

impl<L: Locks> Itable<L> {
    pub(crate) fn new(dev: u32) -> Self {
        let ns = TableNs::<L>::new();
        for i in 0..NINODE {
            let key = -(i as i32) - 1;
            let ptr = SlotPtr::publish(Slot::new_placeholder(key, dev));
            ns.insert(key, ptr).unwrap();
        }
        Self {
            ns,
            placeholder_key: AtomicI32::new(-(NINODE as i32) - 1),
        }
    }

    fn next_placeholder_key(&self) -> i32 {
        self.placeholder_key.fetch_sub(1, SeqCst)
    }
}

impl<L: Locks> Drop for Itable<L> {
    fn drop(&mut self) {
        // No handle and no read-side section can outlive the file system,
        // so every remaining slot is ours to free.
        let mut ptrs = Vec::new();
        self.ns.enumerate(|_, ptr| {
            ptrs.push(ptr);
            None::<()>
        });
        for ptr in ptrs {
            unsafe { ptr.reclaim() };
        }
    }
}

impl<D: Disk, L: Locks> Fs<D, L> {
    /// Returns an unlocked handle on inode `inum`, loading it into the
    /// cache on a miss.
    pub fn iget(&self, dev: u32, inum: u32) -> Iref<'_, D, L> {
        let inner = &self.inner;
        assert!(
            inum >= 1 && inum < inner.sb.ninodes,
            "iget: inum {inum} out of range"
        );
        let key = inum as i32;

        loop {
            // Fast path: find the slot while the read-side section keeps
            // its storage from being freed under us.
            let section = inner.qdom.read_enter();
            if let Some(ptr) = inner.itable.ns.lookup(key) {
                let slot = unsafe { ptr.as_ref() };
                assert_eq!(slot.dev, dev, "iget: inode {inum} is on another device");
                slot.refs.fetch_add(1, SeqCst);
                let claimed = {
                    let st = slot.state.lock();
                    st.flags.contains(SlotFlags::FREE)
                };
                if claimed {
                    // an evictor confirmed this slot before our bump
                    slot.refs.fetch_sub(1, SeqCst);
                    drop(section);
                    continue;
                }
                // refs now pins the slot; leave the section before any
                // blocking wait
                drop(section);

                let mut st = slot.state.lock();
                while !st.flags.contains(SlotFlags::VALID) {
                    st = slot.cond.wait(st);
                }
                drop(st);
                return Iref::adopt(self, ptr);
            }
            drop(section);

            // Miss: push some idle slot out...
            let victim = inner.itable.ns.enumerate(|vkey, vptr| {
                let slot = unsafe { vptr.as_ref() };
                let mut st = slot.state.lock();
                if st.flags.contains(SlotFlags::FREE) || slot.refs.load(SeqCst) != 0 {
                    return None;
                }
                st.flags.insert(SlotFlags::FREE);
                if slot.refs.load(SeqCst) != 0 {
                    // a lookup slipped in between the two checks
                    st.flags.remove(SlotFlags::FREE);
                    return None;
                }
                Some((vkey, vptr))
            });
            let Some((vkey, vptr)) = victim else {
                panic!("iget: no inodes");
            };
            assert!(inner.itable.ns.remove(vkey, vptr), "iget: victim vanished");
            inner.qdom.defer(move || unsafe { vptr.reclaim() });

            // ...and publish a fresh slot, born referenced and
            // write-locked.
            let ptr = SlotPtr::publish(Slot::new_loading(key, dev));
            match inner.itable.ns.insert(key, ptr) {
                Ok(()) => {}
                Err(InsertError::Duplicate) => {
                    // Raced with another miss on the same inum. Drop our
                    // slot, but refill the place the victim left: every
                    // removal must be matched by an insert or the table
                    // shrinks below capacity for good.
                    inner.qdom.defer(move || unsafe { ptr.reclaim() });
                    let filler_key = inner.itable.next_placeholder_key();
                    let filler = SlotPtr::publish(Slot::new_placeholder(filler_key, dev));
                    inner.itable.ns.insert(filler_key, filler).unwrap();
                    continue;
                }
                Err(InsertError::Full) => panic!("iget: inode table overflow"),
            }
            self.load_slot(ptr, inum);
            return Iref::adopt(self, ptr);
        }
    }

    /// Fills a freshly published slot from disk, marks it valid, and
    /// releases its write lock.
    fn load_slot(&self, ptr: SlotPtr<L>, inum: u32) {
        let inner = &self.inner;
        // refs == 1 is ours; the slot cannot go away
        let slot = unsafe { ptr.as_ref() };
        {
            let mut handle = inner.cache.get(inner.sb.inode_block(inum).as_index());
            let Ok(guard) = handle.read();
            let dip = guard.data::<InodeBlock>().get(inum);
            slot.generation.store(dip.generation, SeqCst);
            for (dst, src) in slot.addrs.iter().zip(&dip.addrs) {
                dst.store(*src, SeqCst);
            }
            // the write lock held since birth makes this exclusive
            let meta = unsafe { &mut *slot.body.get() };
            meta.ty = dip.ty;
            meta.major = dip.major;
            meta.minor = dip.minor;
            meta.nlink = dip.nlink;
            meta.size = dip.size;
        }
        slot.state.lock().flags.insert(SlotFlags::VALID);
        unlock_slot(slot);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use block_io::MemDevice;
    use sync_api::StdLocks;
    use v6fs_types::BSIZE;

    use crate::{FileType, Fs, param::NINODE};

    type TestFs = Fs<MemDevice<BSIZE>, StdLocks>;

    const DEV: u32 = 1;

    fn rooted_fs() -> TestFs {
        let device = MemDevice::new(1024);
        mkfs::build(&device, 1024, 200).unwrap();
        Fs::new(device, DEV)
    }

    fn persist(fs: &TestFs, inum: u32) {
        let ip = fs.iget(DEV, inum);
        let mut locked = ip.lock_write();
        locked.nlink = 1;
        locked.update();
    }

    #[test]
    fn concurrent_iget_converges_on_one_slot() {
        let fs = rooted_fs();
        let ip = fs.ialloc(DEV, FileType::File);
        let inum = ip.inum();
        persist(&fs, inum);

        thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| fs.iget(DEV, inum).slot() as *const _ as usize))
                .collect();
            let first = ip.slot() as *const _ as usize;
            for h in handles {
                assert_eq!(h.join().unwrap(), first);
            }
        });
    }

    #[test]
    fn concurrent_misses_converge_and_keep_capacity() {
        let fs = rooted_fs();

        // Each round races four threads through the miss path for an
        // inum that has never been cached: one publication wins and the
        // losers must leave the table at capacity behind them. Holding
        // every handle across the second barrier pins the winning slot,
        // so all four must have landed on it.
        for inum in 50..90 {
            let barrier = Barrier::new(4);
            let addrs: Vec<usize> = thread::scope(|s| {
                let workers: Vec<_> = (0..4)
                    .map(|_| {
                        s.spawn(|| {
                            barrier.wait();
                            let ip = fs.iget(DEV, inum);
                            let addr = ip.slot() as *const _ as usize;
                            barrier.wait();
                            addr
                        })
                    })
                    .collect();
                workers.into_iter().map(|w| w.join().unwrap()).collect()
            });

            assert!(addrs.windows(2).all(|w| w[0] == w[1]));
            assert_eq!(fs.inner.itable.ns.len(), NINODE);
        }
    }

    #[test]
    fn table_stays_at_capacity_through_evictions() {
        let fs = rooted_fs();

        // touch more distinct inodes than the cache has slots
        let inums: Vec<u32> = (0..NINODE as u32 + 10)
            .map(|_| {
                let ip = fs.ialloc(DEV, FileType::File);
                let inum = ip.inum();
                let mut locked = ip.lock_write();
                locked.nlink = 1;
                locked.update();
                inum
            })
            .collect();

        for &inum in &inums {
            let ip = fs.iget(DEV, inum);
            assert_eq!(ip.inum(), inum);
        }
        assert_eq!(fs.inner.itable.ns.len(), NINODE);
    }

    #[test]
    #[should_panic(expected = "iget: no inodes")]
    fn pinned_table_panics_on_miss() {
        let fs = rooted_fs();
        let inums: Vec<u32> = (0..NINODE as u32)
            .map(|_| {
                let ip = fs.ialloc(DEV, FileType::File);
                let inum = ip.inum();
                let mut locked = ip.lock_write();
                locked.nlink = 1;
                locked.update();
                inum
            })
            .collect();

        // pin every slot, then ask for one more inode
        let _pins: Vec<_> = inums.iter().map(|&i| fs.iget(DEV, i)).collect();
        let extra = inums.iter().max().unwrap() + 1;
        let _ = fs.iget(DEV, extra);
    }

    #[test]
    fn idup_and_put_balance_out() {
        let fs = rooted_fs();
        let root = fs.root();
        let before = root.slot().refs.load(core::sync::atomic::Ordering::SeqCst);

        let dup1 = root.clone();
        let dup2 = root.clone();
        drop(dup1);
        drop(dup2);

        assert_eq!(
            root.slot().refs.load(core::sync::atomic::Ordering::SeqCst),
            before
        );
    }

    #[test]
    fn device_mismatch_is_fatal_only_for_wrong_dev() {
        let fs = rooted_fs();
        let a = fs.iget(DEV, 1);
        let b = fs.iget(DEV, 1);
        assert_eq!(a.inum(), b.inum());
    }

    #[test]
    #[should_panic(expected = "is on another device")]
    fn device_mismatch_panics() {
        let fs = rooted_fs();
        let _a = fs.iget(DEV, 1);
        let _b = fs.iget(DEV + 1, 1);
    }
}
