//! An opaque deadline-backed timer exposing a "remaining milliseconds
//! until fire" query, queried by the wait-set to compute its poll
//! timeout (see [`crate::waitset`]).

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::{
    error::{Error, Result},
    handle::{Handle, Kind, Registry},
};

pub struct TimerInner {
    deadline: Mutex<Instant>,
}

impl std::fmt::Debug for TimerInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerInner")
            .field("remaining", &self.wait_time())
            .finish()
    }
}

impl TimerInner {
    /// Non-negative remaining duration until fire; `Duration::ZERO` means
    /// "fire now." Ownership of the deadline is external: nothing inside
    /// this crate rearms a timer on its own.
    pub fn wait_time(&self) -> Duration {
        let deadline = *self.deadline.lock().expect("timer deadline lock poisoned");
        deadline.saturating_duration_since(Instant::now())
    }

    pub fn rearm(&self, remaining: Duration) {
        *self.deadline.lock().expect("timer deadline lock poisoned") = Instant::now() + remaining;
    }
}

impl Registry {
    pub fn timer_create(&self, remaining: Duration) -> Handle {
        let handle = self.create(
            Kind::Timer,
            Arc::new(TimerInner {
                deadline: Mutex::new(Instant::now() + remaining),
            }),
        );
        tracing::debug!(?handle, ?remaining, "timer created");
        handle
    }

    pub fn timer_wait_time(&self, handle: Handle) -> Result<Duration> {
        let guard = self
            .lock::<TimerInner>(handle)
            .ok_or(Error::InvalidHandle { handle })?;
        Ok(guard.wait_time())
    }

    pub fn timer_rearm(&self, handle: Handle, remaining: Duration) -> Result<()> {
        let guard = self
            .lock::<TimerInner>(handle)
            .ok_or(Error::InvalidHandle { handle })?;
        guard.rearm(remaining);
        Ok(())
    }

    pub fn timer_destroy(&self, handle: Handle) {
        self.destroy(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_time_counts_down_to_zero() {
        let registry = Registry::new();
        let handle = registry.timer_create(Duration::from_millis(20));
        assert!(registry.timer_wait_time(handle).unwrap() > Duration::ZERO);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(registry.timer_wait_time(handle).unwrap(), Duration::ZERO);
    }

    #[test]
    fn rearm_resets_the_deadline() {
        let registry = Registry::new();
        let handle = registry.timer_create(Duration::ZERO);
        assert_eq!(registry.timer_wait_time(handle).unwrap(), Duration::ZERO);
        registry.timer_rearm(handle, Duration::from_millis(50)).unwrap();
        assert!(registry.timer_wait_time(handle).unwrap() > Duration::ZERO);
    }
}
