//! Lock and condition variable APIs.
//!
//! Code that must run both under a kernel (spin locks, scheduler-backed
//! sleep) and under a host (for tests) is written against these traits and
//! picks concrete primitives through a [`LockFamily`].
//!
//! The `std` feature provides [`StdLocks`], a family backed by
//! `std::sync::Mutex` and `std::sync::Condvar`.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

use core::ops::DerefMut;

/// A mutex.
pub trait Mutex {
    /// The type of the data that the mutex protects.
    type Data;

    /// The type of the guard that the `lock` method returns.
    type Guard<'a>: DerefMut<Target = Self::Data>
    where
        Self: 'a;

    /// Creates a new mutex.
    fn new(data: Self::Data) -> Self;

    /// Locks the mutex.
    fn lock(&self) -> Self::Guard<'_>;
}

/// A condition variable paired with one mutex type.
///
/// `wait` atomically releases the guard's mutex and suspends the caller;
/// the mutex is reacquired before `wait` returns. Wakeups may be spurious,
/// so callers re-check their predicate in a loop.
pub trait Condvar {
    /// The mutex type whose guards this condition variable accepts.
    type Lock: Mutex;

    /// Creates a new condition variable.
    fn new() -> Self;

    /// Releases `guard`, sleeps until notified, reacquires the lock.
    fn wait<'a>(
        &self,
        guard: <Self::Lock as Mutex>::Guard<'a>,
    ) -> <Self::Lock as Mutex>::Guard<'a>
    where
        Self::Lock: 'a;

    /// Wakes every thread currently blocked in [`Condvar::wait`].
    fn notify_all(&self);
}

/// A family of lock types, one per protected data type.
///
/// Generic containers take a single `LockFamily` parameter instead of one
/// mutex parameter per protected structure.
pub trait LockFamily {
    /// The mutex type protecting a `T`.
    type Lock<T: Send>: Mutex<Data = T> + Send + Sync
    where
        T: 'static;

    /// The condition variable type paired with `Self::Lock<T>`.
    type Condvar<T: Send>: Condvar<Lock = Self::Lock<T>> + Send + Sync
    where
        T: 'static;
}

#[cfg(any(test, feature = "std"))]
mod std_impl {
    use core::{
        marker::PhantomData,
        ops::{Deref, DerefMut},
    };

    use super::{Condvar, LockFamily, Mutex};

    /// [`Mutex`] backed by `std::sync::Mutex`.
    ///
    /// Poisoning is treated as a fatal error: a thread that panicked while
    /// holding a lock has broken the protected invariants.
    pub struct StdMutex<T>(std::sync::Mutex<T>);

    pub struct StdMutexGuard<'a, T>(std::sync::MutexGuard<'a, T>);

    impl<T> Mutex for StdMutex<T> {
        type Data = T;

        type Guard<'a>
            = StdMutexGuard<'a, T>
        where
            T: 'a;

        fn new(data: T) -> Self {
            Self(std::sync::Mutex::new(data))
        }

        fn lock(&self) -> StdMutexGuard<'_, T> {
            StdMutexGuard(self.0.lock().unwrap())
        }
    }

    impl<T> Deref for StdMutexGuard<'_, T> {
        type Target = T;

        fn deref(&self) -> &T {
            &self.0
        }
    }

    impl<T> DerefMut for StdMutexGuard<'_, T> {
        fn deref_mut(&mut self) -> &mut T {
            &mut self.0
        }
    }

    /// [`Condvar`] backed by `std::sync::Condvar`.
    pub struct StdCondvar<T> {
        inner: std::sync::Condvar,
        _marker: PhantomData<fn(T) -> T>,
    }

    impl<T> Condvar for StdCondvar<T> {
        type Lock = StdMutex<T>;

        fn new() -> Self {
            Self {
                inner: std::sync::Condvar::new(),
                _marker: PhantomData,
            }
        }

        fn wait<'a>(&self, guard: StdMutexGuard<'a, T>) -> StdMutexGuard<'a, T>
        where
            T: 'a,
        {
            StdMutexGuard(self.inner.wait(guard.0).unwrap())
        }

        fn notify_all(&self) {
            self.inner.notify_all();
        }
    }

    /// The host lock family.
    pub struct StdLocks;

    impl LockFamily for StdLocks {
        type Lock<T: Send>
            = StdMutex<T>
        where
            T: 'static;

        type Condvar<T: Send>
            = StdCondvar<T>
        where
            T: 'static;
    }
}

#[cfg(any(test, feature = "std"))]
pub use self::std_impl::{StdCondvar, StdLocks, StdMutex, StdMutexGuard};
