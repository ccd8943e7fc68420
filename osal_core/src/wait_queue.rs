//! A FIFO of opaque items coupled to an owned event: `empty()` is false
//! iff the event is signalled, which is what lets the wait-set treat an
//! entire wait-queue as a single readiness source (see
//! [`crate::waitset`]'s `WaitQueue` classification).

use std::{
    any::Any,
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use crate::{
    error::{Error, Result},
    event::EventKind,
    handle::{Handle, Kind, Registry},
};

pub struct WaitQueueInner {
    items: Mutex<VecDeque<Box<dyn Any + Send>>>,
    event: Handle,
}

impl std::fmt::Debug for WaitQueueInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitQueueInner")
            .field("event", &self.event)
            .field("len", &self.items.lock().unwrap().len())
            .finish()
    }
}

impl WaitQueueInner {
    pub(crate) fn event_handle(&self) -> Handle {
        self.event
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.lock().expect("wait-queue items lock poisoned").is_empty()
    }

    /// Single-pass visitor over the queued items in FIFO order — the
    /// idiomatic replacement for the original's by-index `first`/`next`
    /// iteration, which existed only to work around C's lack of closures.
    pub fn for_each(&self, mut visit: impl FnMut(&dyn Any)) {
        for item in self.items.lock().expect("wait-queue items lock poisoned").iter() {
            visit(item.as_ref());
        }
    }
}

impl Registry {
    /// Creates a wait-queue together with its owned manual-reset event.
    pub fn wait_queue_create(&self) -> Handle {
        let event = self.event_create(EventKind::Manual);
        let handle = self.create(
            Kind::WaitQueue,
            Arc::new(WaitQueueInner {
                items: Mutex::new(VecDeque::new()),
                event,
            }),
        );
        tracing::debug!(?handle, ?event, "wait-queue created");
        handle
    }

    pub fn wait_queue_enqueue(&self, handle: Handle, item: Box<dyn Any + Send>) -> Result<()> {
        let guard = self
            .lock::<WaitQueueInner>(handle)
            .ok_or(Error::InvalidHandle { handle })?;
        {
            let mut items = guard.items.lock().expect("wait-queue items lock poisoned");
            items.push_back(item);
        }
        self.event_set(guard.event)?;
        Ok(())
    }

    pub fn wait_queue_dequeue(&self, handle: Handle) -> Result<Option<Box<dyn Any + Send>>> {
        let guard = self
            .lock::<WaitQueueInner>(handle)
            .ok_or(Error::InvalidHandle { handle })?;
        let item = {
            let mut items = guard.items.lock().expect("wait-queue items lock poisoned");
            items.pop_front()
        };
        if guard.is_empty() {
            self.event_reset(guard.event)?;
        }
        Ok(item)
    }

    pub fn wait_queue_empty(&self, handle: Handle) -> Result<bool> {
        let guard = self
            .lock::<WaitQueueInner>(handle)
            .ok_or(Error::InvalidHandle { handle })?;
        Ok(guard.is_empty())
    }

    pub fn wait_queue_event_handle(&self, handle: Handle) -> Result<Handle> {
        let guard = self
            .lock::<WaitQueueInner>(handle)
            .ok_or(Error::InvalidHandle { handle })?;
        Ok(guard.event_handle())
    }

    pub fn wait_queue_destroy(&self, handle: Handle) {
        if let Some(guard) = self.lock::<WaitQueueInner>(handle) {
            self.event_destroy(guard.event_handle());
        }
        self.destroy(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_iff_event_signalled() {
        let registry = Registry::new();
        let handle = registry.wait_queue_create();
        let event = registry.wait_queue_event_handle(handle).unwrap();

        assert!(registry.wait_queue_empty(handle).unwrap());
        assert!(!registry.event_test(event).unwrap());

        registry.wait_queue_enqueue(handle, Box::new(42u32)).unwrap();
        assert!(!registry.wait_queue_empty(handle).unwrap());
        assert!(registry.event_test(event).unwrap());

        let item = registry.wait_queue_dequeue(handle).unwrap().unwrap();
        assert_eq!(*item.downcast::<u32>().unwrap(), 42);
        assert!(registry.wait_queue_empty(handle).unwrap());
        assert!(!registry.event_test(event).unwrap());
    }

    #[test]
    fn dequeue_is_fifo() {
        let registry = Registry::new();
        let handle = registry.wait_queue_create();
        registry.wait_queue_enqueue(handle, Box::new(1u32)).unwrap();
        registry.wait_queue_enqueue(handle, Box::new(2u32)).unwrap();
        let first = *registry.wait_queue_dequeue(handle).unwrap().unwrap().downcast::<u32>().unwrap();
        let second = *registry.wait_queue_dequeue(handle).unwrap().unwrap().downcast::<u32>().unwrap();
        assert_eq!((first, second), (1, 2));
    }
}
