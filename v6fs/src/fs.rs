use alloc::sync::Arc;
use core::convert::Infallible;

use block_io::{BlockDevice, BufCache, BufData, Registry};
use quiescence::{Domain, DomainState};
use sync_api::{LockFamily, Mutex};
use v6fs_types::{BSIZE, BlockNo, SuperBlock};

use crate::{
    device::{CharDevice, DeviceSwitch},
    error::FsError,
    inode::table::Itable,
    namecache::NameCache,
    param::{NBUF, ROOT_INUM},
};

/// A block device this file system can live on.
///
/// Device I/O is infallible here: a failing disk is not something this
/// layer can recover from, so a real driver reports hard errors on its own
/// terms (typically by panicking) rather than through this interface.
pub trait Disk: BlockDevice<BSIZE, Error = Infallible> + Send + Sync + 'static {}

impl<T> Disk for T where T: BlockDevice<BSIZE, Error = Infallible> + Send + Sync + 'static {}

/// The lock primitives the file system runs on.
pub trait Locks: LockFamily + 'static {}

impl<T> Locks for T where T: LockFamily + 'static {}

pub(crate) type BufLock<L> = <L as LockFamily>::Lock<BufData<BSIZE>>;
pub(crate) type Cache<D, L> = BufCache<D, <L as LockFamily>::Lock<Registry<BufLock<L>>>>;
pub(crate) type Qdom<L> = Domain<<L as LockFamily>::Lock<DomainState>>;

/// A mounted file system.
///
/// Cheap to share by reference; all interior state is behind its own
/// locks. Inode handles ([`crate::Iref`]) borrow the `Fs` they came from.
pub struct Fs<D: Disk, L: Locks> {
    pub(crate) inner: Arc<FsInner<D, L>>,
}

pub(crate) struct FsInner<D: Disk, L: Locks> {
    pub(crate) dev: u32,
    pub(crate) sb: SuperBlock,
    pub(crate) cache: Cache<D, L>,
    pub(crate) itable: Itable<L>,
    pub(crate) qdom: Qdom<L>,
    pub(crate) ncache: NameCache<L>,
    devsw: <L as LockFamily>::Lock<DeviceSwitch>,
}

impl<D: Disk, L: Locks> Fs<D, L> {
    /// Mounts the file system on `device`, identified as device `dev`.
    ///
    /// Reads the superblock from block 1 and panics if it does not
    /// describe a plausible image.
    pub fn new(device: D, dev: u32) -> Self {
        let cache: Cache<D, L> = BufCache::new(device, NBUF);
        let sb = {
            let mut handle = cache.get(BlockNo::SUPER.as_index());
            let Ok(guard) = handle.read();
            *guard.data::<SuperBlock>()
        };
        assert!(
            sb.ninodes >= 1 && sb.data_start().value() < sb.size,
            "fs: bad superblock (size {}, ninodes {})",
            sb.size,
            sb.ninodes,
        );

        Self {
            inner: Arc::new(FsInner {
                dev,
                sb,
                cache,
                itable: Itable::new(dev),
                qdom: Domain::new(),
                ncache: NameCache::new(),
                devsw: Mutex::new(DeviceSwitch::new()),
            }),
        }
    }

    /// The device number this file system was mounted as.
    pub fn dev(&self) -> u32 {
        self.inner.dev
    }

    /// The layout header read at mount time.
    pub fn superblock(&self) -> &SuperBlock {
        &self.inner.sb
    }

    /// The underlying block device.
    pub fn disk(&self) -> &D {
        self.inner.cache.device()
    }

    /// A handle on the root directory.
    pub fn root(&self) -> crate::Iref<'_, D, L> {
        self.iget(self.dev(), ROOT_INUM)
    }

    /// Installs the driver for `major`.
    pub fn register_device(&self, major: i16, device: Arc<dyn CharDevice>) {
        self.inner.devsw.lock().set(major, device);
    }

    pub(crate) fn char_device(&self, major: i16) -> Result<Arc<dyn CharDevice>, FsError> {
        self.inner.devsw.lock().get(major)
    }
}
