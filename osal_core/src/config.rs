//! Process-wide tunables. Stands in for the original C layer's
//! compile-time `#define`s; exposed as a `Default`-able struct plus a
//! small builder so tests can exercise non-default capacities (e.g. a
//! one-slot `mio::Events` capacity, to force multiple poll rounds in a
//! single `wait`).

#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Initial capacity of a wait-set's wake-message queue.
    pub wake_queue_capacity: usize,
    /// Capacity of the `mio::Events` buffer a single `WaitSet::wait` poll
    /// call uses.
    pub events_capacity: usize,
    /// Initial capacity of the process-wide thread-local-storage slot
    /// table.
    pub tls_slot_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            wake_queue_capacity: 16,
            events_capacity: 128,
            tls_slot_capacity: 8,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder(Config::default())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConfigBuilder(Config);

impl ConfigBuilder {
    pub fn wake_queue_capacity(mut self, capacity: usize) -> Self {
        self.0.wake_queue_capacity = capacity;
        self
    }

    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.0.events_capacity = capacity;
        self
    }

    pub fn tls_slot_capacity(mut self, capacity: usize) -> Self {
        self.0.tls_slot_capacity = capacity;
        self
    }

    pub fn build(self) -> Config {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = Config::builder().events_capacity(1).build();
        assert_eq!(config.events_capacity, 1);
        assert_eq!(config.wake_queue_capacity, Config::default().wake_queue_capacity);
    }
}
