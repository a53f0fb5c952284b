//! Path lookup.
//!
//! Paths are byte strings; elements longer than `DIRSIZ` are truncated to
//! the width a directory entry can store. The walk releases each
//! directory before locking the next, so it holds at most one inode lock
//! at any moment and two walkers crossing paths cannot deadlock.

use v6fs_types::DIRSIZ;

use crate::{
    error::FsError,
    fs::{Disk, Fs, Locks},
    inode::Iref,
    param::ROOT_INUM,
    stat::FileType,
};

/// Splits the next element off `path`.
///
/// Strips leading and trailing slashes. Returns `None` when nothing is
/// left.
///
/// ```
/// # use v6fs::skip_elem;
/// assert_eq!(skip_elem(b"a/bb/c"), Some((&b"a"[..], &b"bb/c"[..])));
/// assert_eq!(skip_elem(b"///a//bb"), Some((&b"a"[..], &b"bb"[..])));
/// assert_eq!(skip_elem(b"a/"), Some((&b"a"[..], &b""[..])));
/// assert_eq!(skip_elem(b"///"), None);
/// ```
pub fn skip_elem(path: &[u8]) -> Option<(&[u8], &[u8])> {
    let start = path.iter().position(|&c| c != b'/')?;
    let path = &path[start..];
    let end = memchr::memchr(b'/', path).unwrap_or(path.len());
    let (elem, rest) = path.split_at(end);
    let next = rest.iter().position(|&c| c != b'/').unwrap_or(rest.len());
    Some((elem, &rest[next..]))
}

impl<D: Disk, L: Locks> Fs<D, L> {
    /// Resolves `path` to an unlocked handle.
    ///
    /// Absolute paths start at the root; relative ones at `cwd`.
    pub fn namei<'fs>(
        &'fs self,
        cwd: &Iref<'fs, D, L>,
        path: &[u8],
    ) -> Result<Iref<'fs, D, L>, FsError> {
        self.namex(cwd, path, None)
    }

    /// Resolves `path` to the directory containing its last element.
    ///
    /// The last element itself is copied into `name`, null-padded.
    /// Resolving the root this way has no parent to return and fails
    /// with [`FsError::NotFound`].
    pub fn nameiparent<'fs>(
        &'fs self,
        cwd: &Iref<'fs, D, L>,
        path: &[u8],
        name: &mut [u8; DIRSIZ],
    ) -> Result<Iref<'fs, D, L>, FsError> {
        self.namex(cwd, path, Some(name))
    }

    fn namex<'fs>(
        &'fs self,
        cwd: &Iref<'fs, D, L>,
        path: &[u8],
        mut parent_name: Option<&mut [u8; DIRSIZ]>,
    ) -> Result<Iref<'fs, D, L>, FsError> {
        let want_parent = parent_name.is_some();
        let mut ip = if path.first() == Some(&b'/') {
            self.iget(self.dev(), ROOT_INUM)
        } else {
            cwd.clone()
        };

        let mut path = path;
        while let Some((elem, rest)) = skip_elem(path) {
            path = rest;
            let elem = &elem[..usize::min(elem.len(), DIRSIZ)];
            if let Some(out) = parent_name.as_deref_mut() {
                out[..elem.len()].copy_from_slice(elem);
                out[elem.len()..].fill(0);
            }

            if !want_parent {
                if let Some(child) = self.inner.ncache.lookup(ip.inum() as i32, elem) {
                    ip = self.iget(self.dev(), child);
                    continue;
                }
            }

            let locked = ip.lock_read();
            if locked.file_type() != FileType::Dir {
                return Err(FsError::NotADirectory);
            }
            if want_parent && path.is_empty() {
                // stop one level early
                drop(locked);
                return Ok(ip);
            }
            let (next, _off) = locked.lookup(elem)?;
            if !want_parent {
                self.inner.ncache.insert(ip.inum() as i32, elem, next.inum());
            }
            drop(locked);
            ip = next;
        }

        if want_parent {
            // the path named the root itself
            return Err(FsError::NotFound);
        }
        Ok(ip)
    }
}
