//! Event-loop configuration.

/// Configuration for an [`EventLoop`](crate::EventLoop).
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity of the readiness event buffer handed to each poll call.
    pub events_capacity: usize,
    /// Name given to the reactor thread.
    pub thread_name: String,
    /// Number of request states pre-allocated into the pool before the
    /// reactor starts. 0 skips pre-allocation.
    pub pool_reserve: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            events_capacity: 1024,
            thread_name: "hoist-reactor".to_string(),
            pool_reserve: 0,
        }
    }
}
