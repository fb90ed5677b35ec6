//! Channel configuration

use std::time::Duration;

/// Configuration for a messaging channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// How many slots the poller may have outstanding past the committed
    /// cursor before any of them is consumed
    /// Default: 6
    pub poll_ahead: usize,

    /// Channel lifetime. A channel created at t=0 rejects new sends after
    /// t=lifetime and keeps fetching until t=2*lifetime so the peer can
    /// drain in-flight traffic.
    /// Default: 1 week
    pub channel_lifetime: Duration,

    /// Delay before retrying after a transient failure
    /// Default: 5 minutes
    pub task_retry_delay: Duration,

    /// Upper bound of the random delay before acknowledging a received
    /// message, so ack timing does not correlate with receipt
    /// Default: 12 hours
    pub max_ack_delay: Duration,

    /// How long after a handshake publish the handshake is republished if
    /// no response has been observed
    /// Default: 24 hours
    pub rts_resend_interval: Duration,

    /// Delay before retrying when the peer's contact record exists but is
    /// missing key material
    /// Default: 1 hour
    pub missing_key_retry_delay: Duration,

    /// How many time-bucket sub-positions to try when publishing the
    /// handshake before giving up on this attempt
    /// Default: 64
    pub handshake_collision_limit: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            poll_ahead: 6,
            channel_lifetime: Duration::from_secs(7 * 24 * 60 * 60),
            task_retry_delay: Duration::from_secs(5 * 60),
            max_ack_delay: Duration::from_secs(12 * 60 * 60),
            rts_resend_interval: Duration::from_secs(24 * 60 * 60),
            missing_key_retry_delay: Duration::from_secs(60 * 60),
            handshake_collision_limit: 64,
        }
    }
}

impl ChannelConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the poll-ahead window size
    pub fn with_poll_ahead(mut self, slots: usize) -> Self {
        self.poll_ahead = slots;
        self
    }

    /// Set the channel lifetime
    pub fn with_channel_lifetime(mut self, lifetime: Duration) -> Self {
        self.channel_lifetime = lifetime;
        self
    }

    /// Set the retry delay after transient failures
    pub fn with_task_retry_delay(mut self, delay: Duration) -> Self {
        self.task_retry_delay = delay;
        self
    }

    /// Set the ack jitter upper bound
    pub fn with_max_ack_delay(mut self, delay: Duration) -> Self {
        self.max_ack_delay = delay;
        self
    }

    /// Set the handshake resend cadence
    pub fn with_rts_resend_interval(mut self, interval: Duration) -> Self {
        self.rts_resend_interval = interval;
        self
    }

    /// Set the retry delay for contact records missing key material
    pub fn with_missing_key_retry_delay(mut self, delay: Duration) -> Self {
        self.missing_key_retry_delay = delay;
        self
    }

    /// Configuration for testing (millisecond-scale delays)
    pub fn for_testing() -> Self {
        Self {
            poll_ahead: 6,
            channel_lifetime: Duration::from_secs(60),
            task_retry_delay: Duration::from_millis(25),
            max_ack_delay: Duration::from_millis(40),
            rts_resend_interval: Duration::from_millis(400),
            missing_key_retry_delay: Duration::from_millis(100),
            handshake_collision_limit: 8,
        }
    }

    /// Channel lifetime in epoch-millisecond arithmetic
    pub(crate) fn lifetime_millis(&self) -> i64 {
        self.channel_lifetime.as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert_eq!(config.poll_ahead, 6);
        assert_eq!(config.channel_lifetime, Duration::from_secs(7 * 24 * 60 * 60));
        assert_eq!(config.task_retry_delay, Duration::from_secs(300));
        assert_eq!(config.max_ack_delay, Duration::from_secs(12 * 60 * 60));
        assert_eq!(config.rts_resend_interval, Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.missing_key_retry_delay, Duration::from_secs(3600));
    }

    #[test]
    fn test_builder_pattern() {
        let config = ChannelConfig::new()
            .with_poll_ahead(12)
            .with_channel_lifetime(Duration::from_secs(10))
            .with_task_retry_delay(Duration::from_millis(50));

        assert_eq!(config.poll_ahead, 12);
        assert_eq!(config.channel_lifetime, Duration::from_secs(10));
        assert_eq!(config.task_retry_delay, Duration::from_millis(50));
    }

    #[test]
    fn test_testing_config_is_fast() {
        let config = ChannelConfig::for_testing();
        assert!(config.task_retry_delay < Duration::from_secs(1));
        assert!(config.max_ack_delay < Duration::from_secs(1));
        assert!(config.rts_resend_interval < Duration::from_secs(1));
    }

    #[test]
    fn test_lifetime_millis() {
        let config = ChannelConfig::new().with_channel_lifetime(Duration::from_secs(2));
        assert_eq!(config.lifetime_millis(), 2000);
    }
}
