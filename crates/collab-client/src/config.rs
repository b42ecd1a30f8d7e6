use std::time::Duration;

/// Default poll cadence
pub const POLLING_INTERVAL: Duration = Duration::from_secs(15);

/// Consecutive failed poll ticks tolerated before polling shuts itself off
pub const MAX_RETRIES: u32 = 3;

/// Cap on cached activity entries per project
pub const MAX_ACTIVITIES: usize = 50;

/// How recently a user must have been seen to count as online
pub const ONLINE_THRESHOLD: Duration = Duration::from_secs(60);

/// How many activities each poll tick requests
pub const ACTIVITY_FETCH_LIMIT: usize = 20;

/// Per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client configuration
///
/// `new` fills in the platform defaults; the `with_*` methods override
/// individual knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend origin, e.g. "https://app.example.com"
    pub base_url: String,

    /// Delay between poll ticks
    pub polling_interval: Duration,

    /// Retry budget for consecutive failed ticks
    pub max_retries: u32,

    /// Maximum cached activities per project
    pub max_activities: usize,

    /// Online/offline cutoff relative to last_seen
    pub online_threshold: Duration,

    /// Activities requested per tick
    pub activity_fetch_limit: usize,

    /// Timeout applied to every request
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            polling_interval: POLLING_INTERVAL,
            max_retries: MAX_RETRIES,
            max_activities: MAX_ACTIVITIES,
            online_threshold: ONLINE_THRESHOLD,
            activity_fetch_limit: ACTIVITY_FETCH_LIMIT,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_max_activities(mut self, cap: usize) -> Self {
        self.max_activities = cap;
        self
    }

    pub fn with_online_threshold(mut self, threshold: Duration) -> Self {
        self.online_threshold = threshold;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
