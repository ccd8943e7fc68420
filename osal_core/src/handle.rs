//! The handle registry: a process-wide table mapping opaque integer handles
//! to owned, kind-tagged backing objects.
//!
//! This replaces the original C layer's `lock(handle) -> backing` /
//! `unlock(handle)` pair with a scoped [`HandleGuard`]: the guard is an
//! `Arc` clone of the backing object, so it keeps the object alive even
//! after a concurrent `destroy` removes the registry's own reference, and
//! its `Drop` impl is the only "unlock" call site in the crate.

use std::{
    any::Any,
    sync::{Arc, RwLock},
};

/// The closed set of handle kinds this OSAL core recognizes. Immutable for
/// the life of a handle. The wait-set's classifier (see
/// [`crate::waitset`]) matches on this exhaustively, so adding a kind here
/// is a compile-time obligation everywhere it must be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Event,
    Timer,
    Socket,
    WaitQueue,
    WaitSet,
    Thread,
    File,
    FsOverlappedLocal,
    FsOverlappedRemote,
    Queue,
    Pipe,
    Mailslot,
    App,
    Sched,
}

/// An opaque, process-unique handle. Two handles compare equal only if
/// they name the same registry slot *and* the same generation, so a stale
/// copy of a destroyed-and-recycled slot's old handle value never aliases
/// the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// The nil handle sentinel used as a bare-wake marker on the wait-set's
    /// wake queue. Never returned by `create`.
    pub const NIL: Handle = Handle {
        index: u32::MAX,
        generation: u32::MAX,
    };

    pub fn is_nil(self) -> bool {
        self == Self::NIL
    }
}

struct Slot {
    generation: u32,
    kind: Option<Kind>,
    backing: Option<Arc<dyn Any + Send + Sync>>,
    app: Option<Handle>,
    wait_set: Option<Handle>,
}

impl Slot {
    fn vacant(generation: u32) -> Self {
        Slot {
            generation,
            kind: None,
            backing: None,
            app: None,
            wait_set: None,
        }
    }

    fn is_live(&self, handle: Handle) -> bool {
        self.generation == handle.generation && self.kind.is_some()
    }
}

struct Inner {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
}

/// A scoped guard over a handle's backing object, analogous to
/// `tree_memory_arena::Arena::get_node_arc`'s `Arc<RwLock<Node<T>>>`
/// return value: it is a strong reference that keeps the object alive
/// independent of the registry's own bookkeeping, and it carries no
/// explicit "unlock" method because `Drop` is that unlock.
#[derive(Debug)]
pub struct HandleGuard<T: ?Sized> {
    inner: Arc<T>,
}

impl<T: ?Sized> std::ops::Deref for HandleGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: ?Sized> HandleGuard<T> {
    /// Clone the underlying `Arc`. Used by components (notably
    /// [`crate::event`]) that must retain a reference to their backing
    /// storage across a blocking wait, without continuing to hold any
    /// registry-internal lock.
    pub fn as_arc(&self) -> Arc<T>
    where
        T: Sized,
    {
        Arc::clone(&self.inner)
    }
}

/// The handle registry itself. Process-wide by convention (see
/// [`crate::registry`]), but nothing prevents a test from constructing an
/// isolated instance to avoid cross-test interference.
#[derive(Debug)]
pub struct Registry {
    inner: RwLock<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            inner: RwLock::new(Inner {
                slots: Vec::new(),
                free_list: Vec::new(),
            }),
        }
    }

    /// Registers `backing` under `kind` and returns a fresh, live handle.
    pub fn create<T: Any + Send + Sync>(&self, kind: Kind, backing: Arc<T>) -> Handle {
        let mut inner = self.inner.write().expect("handle registry poisoned");
        let index = match inner.free_list.pop() {
            Some(index) => index,
            None => {
                let index = inner.slots.len() as u32;
                inner.slots.push(Slot::vacant(0));
                index
            }
        };
        let slot = &mut inner.slots[index as usize];
        slot.kind = Some(kind);
        slot.backing = Some(backing as Arc<dyn Any + Send + Sync>);
        slot.app = None;
        slot.wait_set = None;
        let handle = Handle {
            index,
            generation: slot.generation,
        };
        tracing::debug!(?handle, ?kind, "handle created");
        handle
    }

    /// Returns a scoped guard over `handle`'s backing object if it is
    /// live and of the requested type. Returns `None` for an unknown,
    /// destroyed, or generation-mismatched (stale) handle, or one whose
    /// backing object is not of type `T` (a programmer error calling the
    /// wrong accessor for `handle`'s kind).
    pub fn lock<T: Any + Send + Sync>(&self, handle: Handle) -> Option<HandleGuard<T>> {
        let inner = self.inner.read().expect("handle registry poisoned");
        let slot = inner.slots.get(handle.index as usize)?;
        if !slot.is_live(handle) {
            return None;
        }
        let backing = slot.backing.clone()?;
        backing
            .downcast::<T>()
            .ok()
            .map(|inner| HandleGuard { inner })
    }

    /// Marks `handle` for removal. Idempotent: destroying an already-dead
    /// or unknown handle is a no-op. Any [`HandleGuard`] obtained before
    /// this call keeps the backing object alive via its own `Arc` clone;
    /// this call only removes the registry's reference and the slot's
    /// eligibility for future `lock`/`kind_of`/etc. lookups.
    pub fn destroy(&self, handle: Handle) {
        let mut inner = self.inner.write().expect("handle registry poisoned");
        let Some(slot) = inner.slots.get_mut(handle.index as usize) else {
            return;
        };
        if !slot.is_live(handle) {
            return;
        }
        slot.kind = None;
        slot.backing = None;
        slot.app = None;
        slot.wait_set = None;
        slot.generation = slot.generation.wrapping_add(1);
        inner.free_list.push(handle.index);
        tracing::debug!(?handle, "handle destroyed");
    }

    pub fn kind_of(&self, handle: Handle) -> Option<Kind> {
        let inner = self.inner.read().expect("handle registry poisoned");
        let slot = inner.slots.get(handle.index as usize)?;
        slot.is_live(handle).then_some(())?;
        slot.kind
    }

    pub fn set_app(&self, handle: Handle, app: Option<Handle>, wait_set: Option<Handle>) {
        let mut inner = self.inner.write().expect("handle registry poisoned");
        let Some(slot) = inner.slots.get_mut(handle.index as usize) else {
            return;
        };
        if !slot.is_live(handle) {
            return;
        }
        slot.app = app;
        slot.wait_set = wait_set;
    }

    pub fn get_app(&self, handle: Handle) -> Option<Handle> {
        let inner = self.inner.read().expect("handle registry poisoned");
        let slot = inner.slots.get(handle.index as usize)?;
        slot.is_live(handle).then_some(())?;
        slot.app
    }

    pub fn get_wait_set(&self, handle: Handle) -> Option<Handle> {
        let inner = self.inner.read().expect("handle registry poisoned");
        let slot = inner.slots.get(handle.index as usize)?;
        slot.is_live(handle).then_some(())?;
        slot.wait_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Payload(u32);

    #[test]
    fn create_then_lock_roundtrips() {
        let registry = Registry::new();
        let handle = registry.create(Kind::Event, Arc::new(Payload(42)));
        assert_eq!(registry.kind_of(handle), Some(Kind::Event));
        let guard = registry.lock::<Payload>(handle).unwrap();
        assert_eq!(guard.0, 42);
    }

    #[test]
    fn destroy_is_idempotent_and_invalidates_lock() {
        let registry = Registry::new();
        let handle = registry.create(Kind::Event, Arc::new(Payload(1)));
        registry.destroy(handle);
        registry.destroy(handle);
        assert!(registry.lock::<Payload>(handle).is_none());
        assert_eq!(registry.kind_of(handle), None);
    }

    #[test]
    fn lock_of_unknown_handle_returns_none() {
        let registry = Registry::new();
        let bogus = Handle {
            index: 999,
            generation: 0,
        };
        assert!(registry.lock::<Payload>(bogus).is_none());
    }

    #[test]
    fn stale_generation_after_recycle_is_rejected() {
        let registry = Registry::new();
        let first = registry.create(Kind::Event, Arc::new(Payload(1)));
        registry.destroy(first);
        let second = registry.create(Kind::Event, Arc::new(Payload(2)));
        assert_eq!(first.index, second.index, "slot should be recycled");
        assert_ne!(first.generation, second.generation);
        assert!(registry.lock::<Payload>(first).is_none());
        assert_eq!(registry.lock::<Payload>(second).unwrap().0, 2);
    }

    #[test]
    fn guard_keeps_backing_alive_after_destroy() {
        let registry = Registry::new();
        let handle = registry.create(Kind::Event, Arc::new(Payload(7)));
        let guard = registry.lock::<Payload>(handle).unwrap();
        registry.destroy(handle);
        // The registry's own reference is gone, but our guard's Arc clone
        // keeps the payload alive and readable.
        assert_eq!(guard.0, 7);
    }
}
