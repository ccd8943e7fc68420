//! Joinable or detached OS threads carrying a user scheduler entry point,
//! cooperative delete signalling, thread-local storage, and a
//! cancellation-aware sleep — the Rust counterpart of `thread_darwin.c`.

use std::{
    cell::RefCell,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex, OnceLock,
    },
    thread::JoinHandle,
    time::Duration,
};

use crate::{
    error::{Error, Result},
    handle::{Handle, Kind, Registry},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachState {
    Joinable,
    Detached,
}

pub struct ThreadInner {
    detach: Mutex<DetachState>,
    delete_requested: AtomicBool,
    wait_set: Mutex<Option<Handle>>,
    notify: Option<Handle>,
    join_handle: Mutex<Option<JoinHandle<u32>>>,
}

impl std::fmt::Debug for ThreadInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadInner")
            .field("detach", &*self.detach.lock().unwrap())
            .field("delete_requested", &self.delete_requested.load(Ordering::SeqCst))
            .finish()
    }
}

impl ThreadInner {
    fn new(detach: DetachState, notify: Option<Handle>) -> Self {
        ThreadInner {
            detach: Mutex::new(detach),
            delete_requested: AtomicBool::new(false),
            wait_set: Mutex::new(None),
            notify,
            join_handle: Mutex::new(None),
        }
    }

    fn detach_state(&self) -> DetachState {
        *self.detach.lock().expect("thread detach-state lock poisoned")
    }

    pub fn is_deleting(&self) -> bool {
        self.delete_requested.load(Ordering::SeqCst)
    }
}

impl Registry {
    /// Spawns `scheduler` as a new OS thread. The trampoline invokes
    /// `scheduler(handle)`, sets `notify` (if present) on return,
    /// and — if `detach` is [`DetachState::Detached`] — destroys its own
    /// handle once the scheduler returns, matching
    /// `ofc_thread_launch`/`ofc_thread_create_impl`'s behavior.
    ///
    /// Requires the registry behind an `Arc` because the trampoline runs
    /// on another OS thread and must own a `'static` reference to it.
    pub fn thread_create(
        self: &Arc<Registry>,
        name: &str,
        detach: DetachState,
        notify: Option<Handle>,
        scheduler: impl FnOnce(Handle) -> u32 + Send + 'static,
    ) -> Result<Handle> {
        let inner = Arc::new(ThreadInner::new(detach, notify));
        let handle = self.create(Kind::Thread, Arc::clone(&inner));

        let trampoline_registry = Arc::clone(self);
        let trampoline_inner = Arc::clone(&inner);
        let builder = std::thread::Builder::new().name(name.to_string());
        let spawn_result = builder.spawn(move || {
            let ret = scheduler(handle);
            if let Some(notify_handle) = trampoline_inner.notify {
                let _ = trampoline_registry.event_set(notify_handle);
            }
            if trampoline_inner.detach_state() == DetachState::Detached {
                trampoline_registry.destroy(handle);
            }
            ret
        });

        match spawn_result {
            Ok(join_handle) => {
                *inner.join_handle.lock().expect("thread join-handle lock poisoned") = Some(join_handle);
                tracing::info!(?handle, ?detach, "thread spawned");
                Ok(handle)
            }
            Err(err) => {
                self.destroy(handle);
                Err(Error::ThreadSpawn(err))
            }
        }
    }

    pub fn thread_set_wait_set(&self, handle: Handle, wait_set: Option<Handle>) -> Result<()> {
        let guard = self.lock::<ThreadInner>(handle).ok_or(Error::InvalidHandle { handle })?;
        *guard.wait_set.lock().expect("thread wait-set lock poisoned") = wait_set;
        Ok(())
    }

    /// Marks `handle` for cooperative shutdown and, if a wait-set is
    /// associated, wakes it so the driven loop notices. There is no
    /// forced preemption: the target thread must poll
    /// `thread_is_deleting` itself.
    pub fn thread_delete(&self, handle: Handle) -> Result<()> {
        let guard = self.lock::<ThreadInner>(handle).ok_or(Error::InvalidHandle { handle })?;
        guard.delete_requested.store(true, Ordering::SeqCst);
        let wait_set = *guard.wait_set.lock().expect("thread wait-set lock poisoned");
        drop(guard);
        if let Some(wait_set) = wait_set {
            self.waitset_wake(wait_set)?;
        }
        Ok(())
    }

    pub fn thread_is_deleting(&self, handle: Handle) -> Result<bool> {
        let guard = self.lock::<ThreadInner>(handle).ok_or(Error::InvalidHandle { handle })?;
        Ok(guard.is_deleting())
    }

    pub fn thread_detach(&self, handle: Handle) -> Result<()> {
        let guard = self.lock::<ThreadInner>(handle).ok_or(Error::InvalidHandle { handle })?;
        *guard.detach.lock().expect("thread detach-state lock poisoned") = DetachState::Detached;
        Ok(())
    }

    /// Blocks until a joinable thread's scheduler returns, then destroys
    /// its handle. A no-op on a detached thread (it has already
    /// destroyed itself by the time any caller could observe it).
    pub fn thread_wait(&self, handle: Handle) -> Result<()> {
        let join_handle = {
            let guard = self.lock::<ThreadInner>(handle).ok_or(Error::InvalidHandle { handle })?;
            if guard.detach_state() == DetachState::Detached {
                return Ok(());
            }
            guard.join_handle.lock().expect("thread join-handle lock poisoned").take()
        };
        if let Some(join_handle) = join_handle {
            let _ = join_handle.join();
        }
        self.destroy(handle);
        Ok(())
    }

    pub fn thread_destroy(&self, handle: Handle) {
        self.destroy(handle);
    }

    /// A cancellation-aware sleep: waits in bounded slices, checking
    /// `thread_is_deleting` between each, so a thread blocked here still
    /// responds promptly to `thread_delete`. This is the crate's
    /// replacement for the original's "sleep a day at a time, then test
    /// cancellation" loop used for `OFC_INFINITE` sleeps.
    pub fn thread_sleep_cancellable(&self, handle: Handle, duration: Duration) -> Result<()> {
        const SLICE: Duration = Duration::from_millis(100);
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            if self.thread_is_deleting(handle)? {
                return Ok(());
            }
            let slice = remaining.min(SLICE);
            std::thread::sleep(slice);
            remaining -= slice;
        }
        Ok(())
    }
}

/// Plain, non-cancellable sleep for callers with no thread handle to
/// poll against.
pub fn sleep(duration: Duration) {
    std::thread::sleep(duration);
}

// --- Thread-local storage -------------------------------------------------

static TLS_KEY_ALLOCATOR: AtomicU32 = AtomicU32::new(0);
static TLS_FREED_KEYS: OnceLock<Mutex<Vec<u32>>> = OnceLock::new();

thread_local! {
    static TLS_VALUES: RefCell<std::collections::HashMap<u32, usize>> = RefCell::new(std::collections::HashMap::new());
}

/// A process-wide thread-local-storage key, analogous to a
/// `pthread_key_t`. `create_variable`/`destroy_variable` allocate and
/// retire keys; `get`/`set` address the calling thread's own slot for a
/// given key. Implemented on top of `std::thread_local!` rather than raw
/// `pthread_key_create`, since Rust already gives every thread a safe
/// per-key slot without FFI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TlsKey(u32);

/// Reserves capacity for `config.tls_slot_capacity` keys in the calling
/// thread's TLS slot table and in the process-wide freed-key free list, to
/// avoid incremental reallocation as a driver thread's early
/// `create_variable` calls ramp up. Purely an allocation hint: correctness
/// does not depend on calling this before `create_variable`.
pub fn init_tls(config: &crate::config::Config) {
    let freed = TLS_FREED_KEYS.get_or_init(|| Mutex::new(Vec::new()));
    freed
        .lock()
        .expect("tls freed-key list poisoned")
        .reserve(config.tls_slot_capacity);
    TLS_VALUES.with(|values| values.borrow_mut().reserve(config.tls_slot_capacity));
}

pub fn create_variable() -> TlsKey {
    let freed = TLS_FREED_KEYS.get_or_init(|| Mutex::new(Vec::new()));
    let mut freed = freed.lock().expect("tls freed-key list poisoned");
    let key = freed.pop().unwrap_or_else(|| TLS_KEY_ALLOCATOR.fetch_add(1, Ordering::SeqCst));
    TlsKey(key)
}

pub fn destroy_variable(key: TlsKey) {
    let freed = TLS_FREED_KEYS.get_or_init(|| Mutex::new(Vec::new()));
    freed.lock().expect("tls freed-key list poisoned").push(key.0);
    TLS_VALUES.with(|values| {
        values.borrow_mut().remove(&key.0);
    });
}

pub fn get_variable(key: TlsKey) -> usize {
    TLS_VALUES.with(|values| values.borrow().get(&key.0).copied().unwrap_or(0))
}

pub fn set_variable(key: TlsKey, value: usize) {
    TLS_VALUES.with(|values| {
        values.borrow_mut().insert(key.0, value);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use std::sync::mpsc;

    #[test]
    fn joinable_thread_runs_and_joins() {
        let registry = Arc::new(Registry::new());
        let (tx, rx) = mpsc::channel();
        let handle = registry
            .thread_create("joinable", DetachState::Joinable, None, move |_handle| {
                tx.send(()).unwrap();
                0
            })
            .unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        registry.thread_wait(handle).unwrap();
    }

    #[test]
    fn notify_event_is_set_on_return() {
        let registry = Arc::new(Registry::new());
        let notify = registry.event_create(EventKind::Manual);
        let handle = registry
            .thread_create("notifier", DetachState::Joinable, Some(notify), |_handle| 0)
            .unwrap();
        registry.thread_wait(handle).unwrap();
        assert!(registry.event_test(notify).unwrap());
    }

    #[test]
    fn delete_sets_flag_observed_by_scheduler() {
        let registry = Arc::new(Registry::new());
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let registry_for_thread = Arc::clone(&registry);
        let handle = registry
            .thread_create("deletable", DetachState::Joinable, None, move |handle| {
                ready_tx.send(()).unwrap();
                while !registry_for_thread.thread_is_deleting(handle).unwrap() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                done_tx.send(()).unwrap();
                0
            })
            .unwrap();
        ready_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        registry.thread_delete(handle).unwrap();
        done_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        registry.thread_wait(handle).unwrap();
    }

    #[test]
    fn tls_slots_are_per_thread() {
        let key = create_variable();
        set_variable(key, 42);
        assert_eq!(get_variable(key), 42);

        let other = std::thread::spawn(move || get_variable(key)).join().unwrap();
        assert_eq!(other, 0, "a fresh thread sees the default, not another thread's value");

        destroy_variable(key);
    }
}
