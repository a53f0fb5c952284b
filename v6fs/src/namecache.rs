//! Directory entry name cache.
//!
//! Maps `(directory inum, name)` to the child's inum so repeated walks
//! skip the linear directory scan. Entries are added on successful
//! lookups; a full cache recycles an arbitrary binding. Nothing here is
//! authoritative: the directory content on disk is.

use namespace::{Entries, InsertError, Namespace};
use sync_api::LockFamily;
use v6fs_types::DIRSIZ;

use crate::{fs::Locks, param::NC_SIZE};

type NcKey = (i32, [u8; DIRSIZ]);

pub(crate) struct NameCache<L: Locks> {
    map: Namespace<<L as LockFamily>::Lock<Entries<NcKey, u32, NC_SIZE>>>,
}

fn key(dir: i32, name: &[u8]) -> NcKey {
    assert!(name.len() <= DIRSIZ, "ncache: name too long");
    let mut padded = [0; DIRSIZ];
    padded[..name.len()].copy_from_slice(name);
    (dir, padded)
}

impl<L: Locks> NameCache<L> {
    pub(crate) fn new() -> Self {
        Self {
            map: Namespace::new(),
        }
    }

    pub(crate) fn lookup(&self, dir: i32, name: &[u8]) -> Option<u32> {
        self.map.lookup(key(dir, name))
    }

    pub(crate) fn insert(&self, dir: i32, name: &[u8], child: u32) {
        let key = key(dir, name);
        match self.map.insert(key, child) {
            Ok(()) | Err(InsertError::Duplicate) => {}
            Err(InsertError::Full) => {
                if let Some((vkey, vval)) = self.map.enumerate(|k, v| Some((k, v))) {
                    self.map.remove(vkey, vval);
                }
                let _ = self.map.insert(key, child);
            }
        }
    }
}
