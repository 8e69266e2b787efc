use crate::subject::DEFAULT_STREAM_NAME;

use std::time::Duration;

/// Batch size used when none is configured.
pub const DEFAULT_UPLOAD_BATCH_SIZE: usize = 50;

/// A non-empty upload batch is flushed once this long has passed since the last flush.
pub const UPLOAD_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Process-wide tunables. Read-only once a client is constructed.
#[derive(Clone, Debug)]
pub struct Config {
    /// Time between polls of each stream.
    pub poll_interval: Duration,

    /// Drop later messages sharing an identifier within one poll.
    pub deduplication_enabled: bool,

    /// Consumers per stage, stream and load class.
    pub worker_amount: usize,

    /// Caps polled publishes at this many per second. `None` or `Some(0)` disables the cap.
    pub throttle_amount: Option<u64>,

    /// Upload batches flush once they grow past this size. Zero selects the default of 50.
    pub upload_batch_size: usize,

    /// Whether poll loops run at all.
    pub poll_enabled: bool,

    /// Broker-side stream holding every subject.
    pub stream_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            deduplication_enabled: false,
            worker_amount: 3,
            throttle_amount: None,
            upload_batch_size: DEFAULT_UPLOAD_BATCH_SIZE,
            poll_enabled: true,
            stream_name: DEFAULT_STREAM_NAME.to_string(),
        }
    }
}

impl Config {
    /// Replaces unset values with their defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.upload_batch_size == 0 {
            self.upload_batch_size = DEFAULT_UPLOAD_BATCH_SIZE;
        }

        // A zero period would make the poll timer spin.
        if self.poll_interval.is_zero() {
            self.poll_interval = DEFAULT_POLL_INTERVAL;
        }

        if self.stream_name.is_empty() {
            self.stream_name = DEFAULT_STREAM_NAME.to_string();
        }

        self
    }

    /// Delay after each polled publish, if throttling is enabled.
    #[must_use]
    pub fn throttle_delay(&self) -> Option<Duration> {
        match self.throttle_amount {
            None | Some(0) => None,
            Some(per_second) => u32::try_from(per_second)
                .map_or(Some(Duration::from_nanos(1)), |per_second| {
                    Some(Duration::from_secs(1) / per_second)
                }),
        }
    }
}
