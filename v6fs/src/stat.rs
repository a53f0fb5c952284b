use strum::FromRepr;
use v6fs_types::{T_DEVICE, T_DIR, T_FILE, T_FREE};

/// Decoded inode type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(i16)]
pub enum FileType {
    Free = T_FREE,
    Dir = T_DIR,
    File = T_FILE,
    Device = T_DEVICE,
}

impl FileType {
    /// Decodes an on-disk type field.
    ///
    /// A slot that made it into the cache mirrors the disk, so a value
    /// outside the known set means the image is corrupt.
    #[must_use]
    pub fn from_disk(ty: i16) -> Self {
        match Self::from_repr(ty) {
            Some(ty) => ty,
            None => panic!("inode: corrupt type {ty}"),
        }
    }
}

/// Metadata snapshot of an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub dev: u32,
    pub ino: u32,
    pub ty: FileType,
    pub nlink: i16,
    pub size: u32,
}
