use alloc::sync::Arc;

use crate::{error::FsError, param::NDEV};

/// A character device reachable through a device inode.
///
/// Device I/O has no file offset; each call passes the minor number from
/// the inode so one driver can back several device nodes.
pub trait CharDevice: Send + Sync {
    fn read(&self, minor: i16, dst: &mut [u8]) -> Result<usize, FsError>;
    fn write(&self, minor: i16, src: &[u8]) -> Result<usize, FsError>;
}

/// The major-number dispatch table.
pub(crate) struct DeviceSwitch {
    slots: [Option<Arc<dyn CharDevice>>; NDEV],
}

impl DeviceSwitch {
    pub(crate) fn new() -> Self {
        Self {
            slots: [const { None }; NDEV],
        }
    }

    pub(crate) fn set(&mut self, major: i16, device: Arc<dyn CharDevice>) {
        let Some(slot) = usize::try_from(major).ok().and_then(|i| self.slots.get_mut(i)) else {
            panic!("devsw: bad major {major}");
        };
        *slot = Some(device);
    }

    pub(crate) fn get(&self, major: i16) -> Result<Arc<dyn CharDevice>, FsError> {
        usize::try_from(major)
            .ok()
            .and_then(|i| self.slots.get(i))
            .and_then(Clone::clone)
            .ok_or(FsError::NoDevice)
    }
}
