//! Fixed-capacity keyed associative container.
//!
//! A [`Namespace`] maps copyable keys to copyable values, bounded at a
//! compile-time capacity, with no allocation after construction. Lookups
//! copy the value out, so a caller never holds the container's internal
//! lock while it works on what it found; whatever lifetime the value
//! points to is the caller's concern (the file system layers pair this
//! container with a reclamation domain for exactly that reason).

#![cfg_attr(not(test), no_std)]

use arrayvec::ArrayVec;
use sync_api::Mutex;

/// Why an [`Namespace::insert`] was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    /// The key is already bound.
    Duplicate,
    /// Every slot is in use.
    Full,
}

/// The entry table protected by the namespace's mutex.
pub struct Entries<K, V, const CAP: usize>(ArrayVec<(K, V), CAP>);

/// A bounded keyed map.
pub struct Namespace<M> {
    entries: M,
}

impl<M, K, V, const CAP: usize> Namespace<M>
where
    M: Mutex<Data = Entries<K, V, CAP>>,
    K: Eq + Copy,
    V: Copy,
{
    pub fn new() -> Self {
        Self {
            entries: M::new(Entries(ArrayVec::new())),
        }
    }

    /// Binds `key` to `value`.
    pub fn insert(&self, key: K, value: V) -> Result<(), InsertError> {
        let mut entries = self.entries.lock();
        if entries.0.iter().any(|(k, _)| *k == key) {
            return Err(InsertError::Duplicate);
        }
        entries
            .0
            .try_push((key, value))
            .map_err(|_| InsertError::Full)
    }

    /// Unbinds `key`, which must currently map to `value`.
    ///
    /// Returns `false` if `key` is not bound. Panics if `key` is bound to
    /// a different value; the caller's picture of the map is stale and
    /// removing someone else's binding would corrupt it.
    pub fn remove(&self, key: K, value: V) -> bool
    where
        V: PartialEq,
    {
        let mut entries = self.entries.lock();
        let Some(pos) = entries.0.iter().position(|(k, _)| *k == key) else {
            return false;
        };
        assert!(entries.0[pos].1 == value, "namespace: mismatched removal");
        entries.0.swap_remove(pos);
        true
    }

    /// Copies out the value bound to `key`.
    pub fn lookup(&self, key: K) -> Option<V> {
        self.entries
            .lock()
            .0
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    /// Visits bindings in unspecified order until `f` returns `Some`.
    ///
    /// `f` runs with the table locked; it must not call back into this
    /// namespace.
    pub fn enumerate<R>(&self, mut f: impl FnMut(K, V) -> Option<R>) -> Option<R> {
        let entries = self.entries.lock();
        entries.0.iter().find_map(|(k, v)| f(*k, *v))
    }

    /// Number of live bindings.
    pub fn len(&self) -> usize {
        self.entries.lock().0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<M, K, V, const CAP: usize> Default for Namespace<M>
where
    M: Mutex<Data = Entries<K, V, CAP>>,
    K: Eq + Copy,
    V: Copy,
{
    fn default() -> Self {
        Self::new()
    }
}
