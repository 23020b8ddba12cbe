//! Timeout configuration for poll-link client operations.
//!
//! Centralizes the bounds on connection establishment, waiting on someone
//! else's in-flight connect, HTTP requests, and transport keepalive.

use std::time::Duration;

/// Timeout configuration for poll-link client operations.
///
/// # Examples
///
/// ```rust
/// use poll_link::PollLinkTimeouts;
/// use std::time::Duration;
///
/// // Defaults (recommended for most cases)
/// let timeouts = PollLinkTimeouts::default();
///
/// // Custom bounds for high-latency environments
/// let timeouts = PollLinkTimeouts::builder()
///     .connect_timeout(Duration::from_secs(15))
///     .request_timeout(Duration::from_secs(60))
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollLinkTimeouts {
    /// Bound on a fresh connect attempt: the attempt settles as a timeout if
    /// neither a connected nor a connect-error event fires within it.
    /// Default: 5 seconds
    pub connect_timeout: Duration,

    /// Bound on waiting for someone else's in-flight connect attempt.
    /// Distinct from `connect_timeout` so the two failures stay
    /// distinguishable. Default: 5 seconds
    pub wait_timeout: Duration,

    /// Timeout for HTTP requests to the poll service.
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Keepalive ping interval for the live transport.
    /// Set to 0 to disable keepalive pings.
    /// Default: 25 seconds
    pub keepalive_interval: Duration,
}

impl Default for PollLinkTimeouts {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            wait_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(25),
        }
    }
}

impl PollLinkTimeouts {
    /// Create a new builder for custom timeout configuration.
    pub fn builder() -> PollLinkTimeoutsBuilder {
        PollLinkTimeoutsBuilder::new()
    }

    /// Aggressive bounds for local development and tests.
    pub fn fast() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            wait_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(5),
        }
    }
}

/// Builder for custom [`PollLinkTimeouts`] configurations.
#[derive(Debug, Clone)]
pub struct PollLinkTimeoutsBuilder {
    timeouts: PollLinkTimeouts,
}

impl PollLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: PollLinkTimeouts::default(),
        }
    }

    /// Set the bound on a fresh connect attempt.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connect_timeout = timeout;
        self
    }

    /// Set the bound on waiting for an in-flight connect.
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.wait_timeout = timeout;
        self
    }

    /// Set the HTTP request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request_timeout = timeout;
        self
    }

    /// Set the keepalive ping interval. Zero disables keepalive.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.timeouts.keepalive_interval = interval;
        self
    }

    /// Build the timeout configuration.
    pub fn build(self) -> PollLinkTimeouts {
        self.timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = PollLinkTimeouts::default();
        assert_eq!(timeouts.connect_timeout, Duration::from_secs(5));
        assert_eq!(timeouts.wait_timeout, Duration::from_secs(5));
        assert_eq!(timeouts.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder() {
        let timeouts = PollLinkTimeouts::builder()
            .connect_timeout(Duration::from_secs(10))
            .wait_timeout(Duration::from_secs(2))
            .build();
        assert_eq!(timeouts.connect_timeout, Duration::from_secs(10));
        assert_eq!(timeouts.wait_timeout, Duration::from_secs(2));
        assert_eq!(timeouts.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_fast_preset() {
        let timeouts = PollLinkTimeouts::fast();
        assert!(timeouts.connect_timeout <= Duration::from_secs(1));
        assert!(timeouts.wait_timeout <= Duration::from_secs(1));
    }
}
