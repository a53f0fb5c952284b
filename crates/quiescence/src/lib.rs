//! Read-side sections with deferred reclamation.
//!
//! A [`Domain`] lets readers traverse shared structures without blocking
//! out writers: a reader enters a *read-side section* (a cheap counter
//! bump), and anything unlinked by a writer while readers are inside the
//! section is handed to [`Domain::defer`] instead of being freed in place.
//! The deferred callbacks run once the last reader of the section leaves,
//! so a reader can keep using a pointer it fetched even after the owning
//! structure has dropped it.
//!
//! Sections are expected to be short and must not block; in particular a
//! reader must leave its section before sleeping on a condition variable.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{boxed::Box, vec::Vec};

use sync_api::Mutex;

type Deferred = Box<dyn FnOnce() + Send>;

/// State protected by the domain's mutex.
pub struct DomainState {
    readers: usize,
    deferred: Vec<Deferred>,
}

/// A reclamation domain.
pub struct Domain<M> {
    state: M,
}

impl<M> Domain<M>
where
    M: Mutex<Data = DomainState>,
{
    pub fn new() -> Self {
        Self {
            state: M::new(DomainState {
                readers: 0,
                deferred: Vec::new(),
            }),
        }
    }

    /// Enters a read-side section.
    ///
    /// Memory passed to [`Domain::defer`] while the returned guard is live
    /// stays valid until the guard is dropped.
    pub fn read_enter(&self) -> ReadSection<'_, M> {
        self.state.lock().readers += 1;
        ReadSection { domain: self }
    }

    fn read_exit(&self) {
        let run = {
            let mut state = self.state.lock();
            assert!(state.readers > 0, "quiescence: unbalanced read_exit");
            state.readers -= 1;
            if state.readers == 0 {
                core::mem::take(&mut state.deferred)
            } else {
                Vec::new()
            }
        };
        for f in run {
            f();
        }
    }

    /// Schedules `f` to run once no reader can still observe the memory it
    /// reclaims.
    ///
    /// Runs `f` immediately when no section is active. A caller inside its
    /// own read-side section therefore always gets deferral, and the
    /// callback runs at its own `read_exit` at the earliest.
    pub fn defer(&self, f: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.state.lock();
            if state.readers > 0 {
                state.deferred.push(Box::new(f));
                return;
            }
        }
        f();
    }

    /// Number of callbacks waiting on a quiescent state.
    pub fn pending(&self) -> usize {
        self.state.lock().deferred.len()
    }
}

impl<M> Default for Domain<M>
where
    M: Mutex<Data = DomainState>,
{
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for a read-side section.
pub struct ReadSection<'a, M>
where
    M: Mutex<Data = DomainState>,
{
    domain: &'a Domain<M>,
}

impl<M> Drop for ReadSection<'_, M>
where
    M: Mutex<Data = DomainState>,
{
    fn drop(&mut self) {
        self.domain.read_exit();
    }
}
