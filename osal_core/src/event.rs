//! Manual- or auto-reset events with broadcast wake semantics.
//!
//! The original Darwin implementation (`event_darwin.c`) releases its
//! handle-registry guard before calling `pthread_cond_wait`, then
//! dereferences the raw backing pointer once the wait returns — a
//! use-after-free if a concurrent `destroy` wins the race. This crate
//! closes that hole by having `wait` take its own `Arc` clone of the
//! backing [`EventInner`] (via [`crate::handle::HandleGuard::as_arc`])
//! *before* the registry guard is dropped, and blocking on that owned
//! `Arc` for the remainder of the call. The registry can destroy the
//! handle freely while a wait is in flight; the waiter's copy keeps the
//! mutex/condvar pair alive until it returns.

use std::sync::{Arc, Condvar, Mutex};

use crate::{
    error::{Error, Result},
    handle::{Handle, Kind, Registry},
    waitset::WaitSetInner,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Manual,
    Auto,
}

/// The wait-set an event posts to when it is set while registered,
/// together with the handle value the event should post as its payload.
/// For a plain `Event` registration this is the event's own handle; for
/// an event owned internally by a wait-queue or overlapped-I/O object,
/// it is that owning object's inner event handle (see
/// [`crate::wait_queue`]).
pub(crate) struct WaitSetLink {
    pub(crate) wait_set: Arc<WaitSetInner>,
    pub(crate) self_handle: Handle,
}

pub struct EventInner {
    kind: EventKind,
    state: Mutex<bool>,
    condvar: Condvar,
    link: Mutex<Option<WaitSetLink>>,
}

impl std::fmt::Debug for EventInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventInner")
            .field("kind", &self.kind)
            .field("signalled", &*self.state.lock().unwrap())
            .finish()
    }
}

impl EventInner {
    fn new(kind: EventKind) -> Self {
        EventInner {
            kind,
            state: Mutex::new(false),
            condvar: Condvar::new(),
            link: Mutex::new(None),
        }
    }

    pub(crate) fn kind(&self) -> EventKind {
        self.kind
    }

    pub(crate) fn set_link(&self, link: WaitSetLink) {
        *self.link.lock().expect("event link lock poisoned") = Some(link);
    }

    pub(crate) fn clear_link(&self) {
        *self.link.lock().expect("event link lock poisoned") = None;
    }

    /// Non-blocking read of the signalled bit, without consuming it.
    pub fn test(&self) -> bool {
        *self.state.lock().expect("event state lock poisoned")
    }

    pub fn set(&self) {
        {
            let mut state = self.state.lock().expect("event state lock poisoned");
            *state = true;
        }
        self.condvar.notify_all();
        if let Some(link) = self.link.lock().expect("event link lock poisoned").as_ref() {
            link.wait_set.post(Some(link.self_handle));
        }
        tracing::trace!("event set");
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().expect("event state lock poisoned");
        *state = false;
    }

    /// Blocks until signalled. On an auto event, atomically resets the
    /// bit before returning so that exactly one waiter observes any
    /// given `set`.
    pub fn wait(&self) {
        let mut state = self.state.lock().expect("event state lock poisoned");
        while !*state {
            state = self.condvar.wait(state).expect("event state lock poisoned");
        }
        if self.kind == EventKind::Auto {
            *state = false;
        }
    }
}

impl Registry {
    pub fn event_create(&self, kind: EventKind) -> Handle {
        let handle = self.create(Kind::Event, Arc::new(EventInner::new(kind)));
        tracing::debug!(?handle, ?kind, "event created");
        handle
    }

    pub fn event_set(&self, handle: Handle) -> Result<()> {
        let guard = self
            .lock::<EventInner>(handle)
            .ok_or(Error::InvalidHandle { handle })?;
        guard.set();
        Ok(())
    }

    pub fn event_reset(&self, handle: Handle) -> Result<()> {
        let guard = self
            .lock::<EventInner>(handle)
            .ok_or(Error::InvalidHandle { handle })?;
        guard.reset();
        Ok(())
    }

    /// Blocks the calling thread until `handle` is signalled. Holds only
    /// an `Arc` clone of the event's backing storage while blocked, never
    /// the registry's internal lock nor the [`crate::handle::HandleGuard`]
    /// itself (see module docs).
    pub fn event_wait(&self, handle: Handle) -> Result<()> {
        let backing = {
            let guard = self
                .lock::<EventInner>(handle)
                .ok_or(Error::InvalidHandle { handle })?;
            guard.as_arc()
        };
        backing.wait();
        Ok(())
    }

    pub fn event_test(&self, handle: Handle) -> Result<bool> {
        let guard = self
            .lock::<EventInner>(handle)
            .ok_or(Error::InvalidHandle { handle })?;
        Ok(guard.test())
    }

    pub fn event_get_kind(&self, handle: Handle) -> Result<EventKind> {
        let guard = self
            .lock::<EventInner>(handle)
            .ok_or(Error::InvalidHandle { handle })?;
        Ok(guard.kind())
    }

    pub fn event_destroy(&self, handle: Handle) {
        self.destroy(handle);
    }
}
