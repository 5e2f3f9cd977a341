//! Heartbeat watchdog policy. The actual timer lives in the
//! connection task's own `tokio::select!` loop (a
//! `tokio::time::interval` tick, not a shared timer wheel); this
//! module only holds the check itself so the policy is tested apart
//! from any particular event loop.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatPolicy {
    pub enabled: bool,
    pub check_interval: Duration,
    pub timeout: Duration,
}

impl HeartbeatPolicy {
    pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn enabled(check_interval: Duration, timeout: Duration) -> Self {
        Self { enabled: true, check_interval, timeout }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            check_interval: Self::DEFAULT_CHECK_INTERVAL,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// True if `last_packet_time` is old enough that the connection
    /// should be force-closed. Always false when the watchdog is off.
    pub fn is_expired(&self, last_packet_time: Instant, now: Instant) -> bool {
        self.enabled && now.saturating_duration_since(last_packet_time) > self.timeout
    }
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self::enabled(Self::DEFAULT_CHECK_INTERVAL, Self::DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_after_timeout_elapses() {
        let policy = HeartbeatPolicy::enabled(Duration::from_secs(5), Duration::from_secs(30));
        let last = Instant::now();
        assert!(!policy.is_expired(last, last + Duration::from_secs(29)));
        assert!(policy.is_expired(last, last + Duration::from_secs(31)));
    }

    #[test]
    fn disabled_policy_never_expires() {
        let policy = HeartbeatPolicy::disabled();
        let last = Instant::now();
        assert!(!policy.is_expired(last, last + Duration::from_secs(3600)));
    }
}
