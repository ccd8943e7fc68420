//! Reentrant mutex, mirroring `lock_darwin.c`'s `pthread_mutex_t` with
//! `PTHREAD_MUTEX_RECURSIVE`: the owning thread may re-acquire any number
//! of times and must release the same number of times before another
//! thread can acquire. Higher layers depend on this because callbacks
//! delivered during event dispatch sometimes re-enter a lock the
//! delivering thread already holds.
//!
//! Unlike events, timers, sockets, wait-queues, threads, and wait-sets, a
//! recursive lock is not one of the closed set of handle kinds in §3 of
//! the specification — the original source manages it as a bare
//! `void *` outside the handle table. This crate mirrors that: a
//! [`RecursiveLock`] is a standalone, cheaply-`Clone`-able handle around
//! an `Arc`, not a [`crate::handle::Handle`] registered with the
//! [`crate::handle::Registry`].

use std::{
    sync::{Arc, Condvar, Mutex},
    thread::ThreadId,
};

struct State {
    owner: Option<ThreadId>,
    depth: u32,
}

struct Inner {
    state: Mutex<State>,
    condvar: Condvar,
}

/// A reentrant mutex. Cloning a `RecursiveLock` shares the same
/// underlying lock (it is a thin `Arc` wrapper), matching the original's
/// single heap-allocated `BLUE_LOCK_IMPL` shared by reference.
#[derive(Clone)]
pub struct RecursiveLock(Arc<Inner>);

impl std::fmt::Debug for RecursiveLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecursiveLock").finish_non_exhaustive()
    }
}

impl Default for RecursiveLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RecursiveLock {
    pub fn new() -> Self {
        RecursiveLock(Arc::new(Inner {
            state: Mutex::new(State {
                owner: None,
                depth: 0,
            }),
            condvar: Condvar::new(),
        }))
    }

    pub fn try_lock(&self) -> bool {
        let this = std::thread::current().id();
        let mut state = self.0.state.lock().expect("recursive lock state poisoned");
        match state.owner {
            Some(owner) if owner == this => {
                state.depth += 1;
                true
            }
            None => {
                state.owner = Some(this);
                state.depth = 1;
                true
            }
            Some(_) => false,
        }
    }

    pub fn lock(&self) {
        let this = std::thread::current().id();
        let mut state = self.0.state.lock().expect("recursive lock state poisoned");
        loop {
            match state.owner {
                Some(owner) if owner == this => {
                    state.depth += 1;
                    return;
                }
                None => {
                    state.owner = Some(this);
                    state.depth = 1;
                    return;
                }
                Some(_) => {
                    state = self.0.condvar.wait(state).expect("recursive lock state poisoned");
                }
            }
        }
    }

    /// Panics if the calling thread does not currently own the lock;
    /// this mirrors `pthread_mutex_unlock`'s undefined behavior on
    /// mismatched unlock with a loud failure instead of silent
    /// corruption.
    pub fn unlock(&self) {
        let this = std::thread::current().id();
        let mut state = self.0.state.lock().expect("recursive lock state poisoned");
        assert_eq!(state.owner, Some(this), "unlock called by non-owning thread");
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            self.0.condvar.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentrant_lock_same_thread() {
        let lock = RecursiveLock::new();
        lock.lock();
        lock.lock();
        assert!(lock.try_lock());
        lock.unlock();
        lock.unlock();
        lock.unlock();
    }

    #[test]
    fn try_lock_fails_for_other_thread_owner() {
        let lock = RecursiveLock::new();
        lock.lock();

        let other = lock.clone();
        let other_acquired = std::thread::spawn(move || other.try_lock()).join().unwrap();
        assert!(!other_acquired);

        lock.unlock();
    }

    #[test]
    fn blocking_lock_waits_for_release() {
        let lock = RecursiveLock::new();
        lock.lock();

        let other = lock.clone();
        let waiter = std::thread::spawn(move || {
            other.lock();
            other.unlock();
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        lock.unlock();
        waiter.join().unwrap();
    }
}
