use std::time::Duration;

/// Number of consecutive transfer failures after which a capture session is abandoned.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// The capture buffer holds this many max-size packets of the bound endpoint.
pub const BUFFER_MULTIPLIER: usize = 1024;

/// Tunables of the capture loop.
#[derive(Debug, Clone)]
pub struct Config {
    max_retry_attempts: u32,
    buffer_multiplier: usize,
    retry_backoff: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_retry_attempts: MAX_RETRY_ATTEMPTS,
            buffer_multiplier: BUFFER_MULTIPLIER,
            retry_backoff: Duration::from_secs(0),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of failed transfers that puts the session into the failed state.
    ///
    /// A value of 0 is treated like 1: the first failure is terminal.
    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts.max(1);
        self
    }

    /// Sets the capture buffer size as a multiple of the endpoint's max packet size.
    pub fn with_buffer_multiplier(mut self, multiplier: usize) -> Self {
        self.buffer_multiplier = multiplier;
        self
    }

    /// Sets a delay between a failed transfer and the next attempt.
    ///
    /// Zero (the default) retries immediately.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn max_retry_attempts(&self) -> u32 {
        self.max_retry_attempts
    }

    pub fn buffer_multiplier(&self) -> usize {
        self.buffer_multiplier
    }

    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    /// Size of the capture buffer for an endpoint with the given max packet size.
    pub fn buffer_size(&self, max_packet_size: u16) -> usize {
        usize::from(max_packet_size).saturating_mul(self.buffer_multiplier)
    }
}
