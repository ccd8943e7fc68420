//! Collaborator-facing capability hooks (§6): the only entry points by
//! which the file, overlapped-I/O, and timer-queue layers — all out of
//! core scope (§1) — integrate new readiness sources with the wait-set.
//! Each trait corresponds to one of the five extension patterns §6
//! enumerates (pre-test event, pre-test wait-queue, pollable fd,
//! deadline, inert); adding a new readiness kind means adding a
//! classifier arm in [`crate::waitset`] plus an implementation of
//! whichever of these traits fits.
//!
//! This crate owns minimal concrete handle kinds for `File`,
//! `FsOverlappedLocal`, and `FsOverlappedRemote` so the wait-set's
//! classifier has something real to exercise in tests; a full local-fs or
//! SMB layer is out of scope here and would supply its own backing types
//! implementing these same traits.

use std::{
    os::unix::io::RawFd,
    sync::Arc,
};

use crate::{
    error::{Error, Result},
    handle::{Handle, Kind, Registry},
};

/// A local-fs readiness source: pollable directly via its file
/// descriptor (sync-via-fd, §4.7).
pub trait LocalFile: Send + Sync {
    fn fd(&self) -> RawFd;
}

/// A local-fs overlapped (asynchronous) operation: readiness is the
/// completion event firing (sync-via-event, §4.7).
pub trait LocalOverlapped: Send + Sync {
    fn completion_event(&self) -> Handle;
}

/// A remote-fs (SMB) overlapped operation: readiness is its completion
/// wait-queue becoming non-empty (sync-via-wait-queue, §4.7). The
/// wait-queue's own owned event (see [`crate::wait_queue`]) is what
/// actually gets a wait-set back-reference; there is no separate event
/// to name here.
pub trait RemoteOverlapped: Send + Sync {
    fn completion_wait_queue(&self) -> Handle;
}

/// A deadline-backed readiness source (sync-via-deadline, §4.7). Kept
/// for documentation purposes alongside [`crate::timer::TimerInner`],
/// which already implements this shape directly.
pub trait TimerSource: Send + Sync {
    fn wait_time(&self) -> std::time::Duration;
}

#[derive(Debug)]
pub struct FileInner {
    fd: RawFd,
}

impl LocalFile for FileInner {
    fn fd(&self) -> RawFd {
        self.fd
    }
}

#[derive(Debug)]
pub struct OverlappedLocalInner {
    pub(crate) event: Handle,
}

impl LocalOverlapped for OverlappedLocalInner {
    fn completion_event(&self) -> Handle {
        self.event
    }
}

#[derive(Debug)]
pub struct OverlappedRemoteInner {
    pub(crate) wait_queue: Handle,
}

impl RemoteOverlapped for OverlappedRemoteInner {
    fn completion_wait_queue(&self) -> Handle {
        self.wait_queue
    }
}

impl Registry {
    /// Registers a raw, already-open file descriptor as a pollable
    /// local-fs readiness source.
    pub fn file_create(&self, fd: RawFd) -> Handle {
        let handle = self.create(Kind::File, Arc::new(FileInner { fd }));
        tracing::debug!(?handle, fd, "file handle created");
        handle
    }

    pub fn file_destroy(&self, handle: Handle) {
        self.destroy(handle);
    }

    /// Registers a local-fs overlapped operation whose readiness is
    /// `completion_event` firing.
    pub fn fs_overlapped_local_create(&self, completion_event: Handle) -> Result<Handle> {
        match self.kind_of(completion_event) {
            None => return Err(Error::InvalidHandle { handle: completion_event }),
            Some(Kind::Event) => {}
            Some(actual) => {
                return Err(Error::WrongKind { handle: completion_event, expected: Kind::Event, actual });
            }
        }
        let handle = self.create(Kind::FsOverlappedLocal, Arc::new(OverlappedLocalInner { event: completion_event }));
        Ok(handle)
    }

    pub fn fs_overlapped_local_destroy(&self, handle: Handle) {
        self.destroy(handle);
    }

    /// Registers a remote-fs (SMB) overlapped operation whose readiness
    /// is `completion_wait_queue` becoming non-empty.
    pub fn fs_overlapped_remote_create(&self, completion_wait_queue: Handle) -> Result<Handle> {
        match self.kind_of(completion_wait_queue) {
            None => return Err(Error::InvalidHandle { handle: completion_wait_queue }),
            Some(Kind::WaitQueue) => {}
            Some(actual) => {
                return Err(Error::WrongKind { handle: completion_wait_queue, expected: Kind::WaitQueue, actual });
            }
        }
        let handle = self.create(
            Kind::FsOverlappedRemote,
            Arc::new(OverlappedRemoteInner { wait_queue: completion_wait_queue }),
        );
        Ok(handle)
    }

    pub fn fs_overlapped_remote_destroy(&self, handle: Handle) {
        self.destroy(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[test]
    fn overlapped_local_tracks_its_completion_event() {
        let registry = Registry::new();
        let event = registry.event_create(EventKind::Manual);
        let overlapped = registry.fs_overlapped_local_create(event).unwrap();
        let guard = registry.lock::<OverlappedLocalInner>(overlapped).unwrap();
        assert_eq!(guard.completion_event(), event);
    }

    #[test]
    fn overlapped_local_rejects_non_event_handle() {
        let registry = Registry::new();
        let queue = registry.wait_queue_create();
        let err = registry.fs_overlapped_local_create(queue).unwrap_err();
        assert!(matches!(err, Error::WrongKind { expected: Kind::Event, actual: Kind::WaitQueue, .. }));
    }

    #[test]
    fn overlapped_remote_rejects_unknown_handle() {
        let registry = Registry::new();
        let bogus = registry.event_create(EventKind::Manual);
        registry.event_destroy(bogus);
        let err = registry.fs_overlapped_remote_create(bogus).unwrap_err();
        assert!(matches!(err, Error::InvalidHandle { .. }));
    }
}
