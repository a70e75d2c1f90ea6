use std::time::Duration;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RETAINED_JOBS: usize = 100;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound on concurrent sends within one job. Values below 1 are
    /// treated as 1.
    pub max_in_flight: usize,
    /// Minimum spacing between the start of two sends of the same job.
    pub send_interval: Duration,
    /// Pause applied after a rate-limited send when Telegram gives no
    /// `retry_after`.
    pub rate_limit_backoff: Duration,
    /// Finished jobs beyond this count are evicted oldest first.
    pub max_retained_jobs: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            send_interval: DEFAULT_SEND_INTERVAL,
            rate_limit_backoff: DEFAULT_RATE_LIMIT_BACKOFF,
            max_retained_jobs: DEFAULT_MAX_RETAINED_JOBS,
        }
    }
}
