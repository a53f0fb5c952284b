//! Buffered block I/O.
//!
//! A [`BufCache`] fronts a [`BlockDevice`] with a fixed pool of in-memory
//! buffers. [`BufCache::get`] hands out a handle to the buffer assigned to
//! a block, recycling the least recently used idle buffer on a miss;
//! [`BufHandle::read`] locks the buffer and fills it from the device if the
//! cached bytes are not valid. Writes go straight to the device through
//! [`BufGuard::write`]; there is no write-back queue.
//!
//! Holding a [`BufGuard`] is what serializes access to a block: two threads
//! touching the same block contend on that buffer's lock, not on the cache.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

use alloc::{boxed::Box, sync::Arc, vec::Vec};

use dataview::{Pod, PodMethods as _};
use sync_api::Mutex;

/// A device addressable in `N`-byte blocks.
pub trait BlockDevice<const N: usize> {
    type Error;

    fn read(&self, index: usize, buf: &mut [u8; N]) -> Result<(), Self::Error>;
    fn write(&self, index: usize, buf: &[u8; N]) -> Result<(), Self::Error>;
}

const UNASSIGNED: usize = usize::MAX;

/// Block bytes, overaligned so they can be viewed as any on-disk structure.
#[derive(Clone, Copy)]
#[repr(C, align(8))]
struct Aligned<const N: usize>([u8; N]);

/// One buffer's content, protected by its own mutex.
pub struct BufData<const N: usize> {
    index: usize,
    valid: bool,
    bytes: Box<Aligned<N>>,
}

struct Entry<BM> {
    /// Block this buffer is assigned to, or [`UNASSIGNED`].
    index: usize,
    /// Tick of the most recent `get`; smallest is recycled first.
    last_used: u64,
    data: Arc<BM>,
}

/// The buffer assignment table.
pub struct Registry<BM> {
    entries: Vec<Entry<BM>>,
    tick: u64,
}

/// A fixed pool of block buffers over a device.
pub struct BufCache<D, TM> {
    device: D,
    table: TM,
}

impl<D, TM, BM, const N: usize> BufCache<D, TM>
where
    D: BlockDevice<N>,
    TM: Mutex<Data = Registry<BM>>,
    BM: Mutex<Data = BufData<N>>,
{
    /// Creates a cache of `nbufs` buffers over `device`.
    pub fn new(device: D, nbufs: usize) -> Self {
        assert!(nbufs > 0);
        let entries = (0..nbufs)
            .map(|_| Entry {
                index: UNASSIGNED,
                last_used: 0,
                data: Arc::new(BM::new(BufData {
                    index: UNASSIGNED,
                    valid: false,
                    bytes: Box::new(Aligned([0; N])),
                })),
            })
            .collect();
        Self {
            device,
            table: TM::new(Registry { entries, tick: 0 }),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Returns a handle on the buffer assigned to `index`, or `None` when
    /// every buffer is pinned by an outstanding handle.
    pub fn try_get(&self, index: usize) -> Option<BufHandle<'_, D, BM>> {
        let mut table = self.table.lock();
        table.tick += 1;
        let tick = table.tick;

        if let Some(entry) = table.entries.iter_mut().find(|e| e.index == index) {
            entry.last_used = tick;
            return Some(BufHandle {
                device: &self.device,
                index,
                buf: Arc::clone(&entry.data),
            });
        }

        // Miss: recycle the least recently used idle buffer. A buffer is
        // idle iff the registry holds the only reference to it.
        let victim = table
            .entries
            .iter_mut()
            .filter(|e| Arc::strong_count(&e.data) == 1)
            .min_by_key(|e| e.last_used)?;
        victim.index = index;
        victim.last_used = tick;
        Some(BufHandle {
            device: &self.device,
            index,
            buf: Arc::clone(&victim.data),
        })
    }

    /// Like [`BufCache::try_get`], but exhaustion is fatal.
    pub fn get(&self, index: usize) -> BufHandle<'_, D, BM> {
        match self.try_get(index) {
            Some(handle) => handle,
            None => panic!("block {index}: buffer cache exhausted"),
        }
    }
}

/// An unlocked reference to one cached block.
///
/// The buffer stays assigned to its block while any handle is live.
pub struct BufHandle<'a, D, BM> {
    device: &'a D,
    index: usize,
    buf: Arc<BM>,
}

impl<'a, D, BM, const N: usize> BufHandle<'a, D, BM>
where
    D: BlockDevice<N>,
    BM: Mutex<Data = BufData<N>>,
{
    pub fn index(&self) -> usize {
        self.index
    }

    /// Locks the buffer, reading it from the device if not already cached.
    pub fn read(&mut self) -> Result<BufGuard<'_, D, BM, N>, D::Error> {
        let mut data = self.buf.lock();
        if data.index != self.index {
            // the buffer was recycled between `get` and here
            data.index = self.index;
            data.valid = false;
        }
        if !data.valid {
            self.device.read(self.index, &mut data.bytes.0)?;
            data.valid = true;
        }
        Ok(BufGuard {
            device: self.device,
            index: self.index,
            data,
        })
    }

    /// Locks the buffer and fills it with zeros, skipping the device read.
    pub fn zeroed(&mut self) -> BufGuard<'_, D, BM, N> {
        let mut data = self.buf.lock();
        data.index = self.index;
        data.bytes.0.fill(0);
        data.valid = true;
        BufGuard {
            device: self.device,
            index: self.index,
            data,
        }
    }
}

/// A locked, valid block buffer.
pub struct BufGuard<'a, D, BM, const N: usize>
where
    BM: Mutex<Data = BufData<N>> + 'a,
{
    device: &'a D,
    index: usize,
    data: BM::Guard<'a>,
}

impl<'a, D, BM, const N: usize> BufGuard<'a, D, BM, N>
where
    D: BlockDevice<N>,
    BM: Mutex<Data = BufData<N>> + 'a,
{
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn bytes(&self) -> &[u8; N] {
        &self.data.bytes.0
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; N] {
        &mut self.data.bytes.0
    }

    /// Views the block as an on-disk structure.
    pub fn data<T: Pod>(&self) -> &T {
        self.bytes().as_data_view().get(0)
    }

    /// Views the block mutably as an on-disk structure.
    pub fn data_mut<T: Pod>(&mut self) -> &mut T {
        self.bytes_mut().as_data_view_mut().get_mut(0)
    }

    /// Writes the buffer through to the device.
    pub fn write(&mut self) -> Result<(), D::Error> {
        self.device.write(self.index, &self.data.bytes.0)
    }
}

#[cfg(any(test, feature = "std"))]
mod mem {
    use core::convert::Infallible;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use alloc::{boxed::Box, vec::Vec};

    use super::BlockDevice;

    /// An in-memory block device for tests and image building.
    pub struct MemDevice<const N: usize> {
        blocks: Vec<Mutex<Box<[u8; N]>>>,
        reads: AtomicUsize,
        writes: AtomicUsize,
    }

    impl<const N: usize> MemDevice<N> {
        #[must_use]
        pub fn new(nblocks: usize) -> Self {
            Self {
                blocks: (0..nblocks).map(|_| Mutex::new(Box::new([0; N]))).collect(),
                reads: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
            }
        }

        #[must_use]
        pub fn nblocks(&self) -> usize {
            self.blocks.len()
        }

        /// Total number of block reads served.
        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        /// Total number of block writes served.
        pub fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    impl<const N: usize> BlockDevice<N> for MemDevice<N> {
        type Error = Infallible;

        fn read(&self, index: usize, buf: &mut [u8; N]) -> Result<(), Infallible> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            buf.copy_from_slice(&**self.blocks[index].lock().unwrap());
            Ok(())
        }

        fn write(&self, index: usize, buf: &[u8; N]) -> Result<(), Infallible> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.blocks[index].lock().unwrap().copy_from_slice(buf);
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "std"))]
pub use self::mem::MemDevice;
