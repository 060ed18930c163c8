//! Tunables for the history core.
//!
//! Defaults match the interactive log view: the first 1000 identifiers are
//! pushed to the UI as they arrive, then at most once a second.

use std::time::Duration;

use crate::git::batch::ThrottleConfig;

pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Maximum concurrent `git show` processes per prefetcher
    pub prefetch_concurrency: usize,
    /// Upper bound for one revision load; `None` waits forever
    pub load_timeout: Option<Duration>,
    pub list_throttle: ThrottleConfig,
    pub blame_throttle: ThrottleConfig,
    /// Revisions warmed when a log session first has data
    pub prime_count: usize,
    /// Scanned indices between search progress reports
    pub progress_interval: usize,
    /// Buffer size of each session's event channels
    pub event_capacity: usize,
    /// How long a log or blame session survives without any event subscriber
    pub session_idle_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            prefetch_concurrency: default_concurrency(),
            load_timeout: Some(DEFAULT_LOAD_TIMEOUT),
            list_throttle: ThrottleConfig::new(1000, Duration::from_secs(1)),
            blame_throttle: ThrottleConfig::new(0, Duration::from_secs(1)),
            prime_count: 50,
            progress_interval: 100,
            event_capacity: 1024,
            session_idle_timeout: DEFAULT_SESSION_IDLE_TIMEOUT,
        }
    }
}

pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
