use std::time::Duration;

/// Configuration for chunked transfers
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// How often the progress observer samples the transfer position
    pub poll_interval: Duration,

    /// Minimum time between two throughput recomputations
    pub speed_window: Duration,

    /// Remove other files carrying the same name after a verified upload
    pub prune_previous: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(150),
            speed_window: Duration::from_millis(300),
            prune_previous: true,
        }
    }
}

impl TransferConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the observer sampling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the throughput window
    pub fn with_speed_window(mut self, window: Duration) -> Self {
        self.speed_window = window;
        self
    }

    /// Keep every previous upload of the same filename
    pub fn keep_previous(mut self) -> Self {
        self.prune_previous = false;
        self
    }
}
