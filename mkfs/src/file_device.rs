use std::{
    fs::{File, OpenOptions},
    io::{self, Read as _, Seek as _, SeekFrom, Write as _},
    path::Path,
    sync::Mutex,
};

use block_io::BlockDevice;
use v6fs_types::BSIZE;

/// A [`BlockDevice`] over an image file.
pub struct FileDevice {
    file: Mutex<File>,
}

impl FileDevice {
    /// Creates (or truncates) an image file of `nblocks` blocks.
    pub fn create(path: &Path, nblocks: u32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(u64::from(nblocks) * BSIZE as u64)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Opens an existing image file.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl BlockDevice<BSIZE> for FileDevice {
    type Error = io::Error;

    fn read(&self, index: usize, buf: &mut [u8; BSIZE]) -> io::Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(index as u64 * BSIZE as u64))?;
        file.read_exact(buf)
    }

    fn write(&self, index: usize, buf: &[u8; BSIZE]) -> io::Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(index as u64 * BSIZE as u64))?;
        file.write_all(buf)
    }
}
