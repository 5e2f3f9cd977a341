//! Tunables the core needs at construction. `services/server` builds
//! this from its own TOML configuration; tests build it with
//! [`CoreConfig::default`] or a deliberately short heartbeat timeout.

use std::time::Duration;

use crate::heartbeat::HeartbeatPolicy;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub heartbeat: HeartbeatPolicy,
    pub offline_buffer_depth: usize,
    pub compress_threshold: usize,
    pub group_id_boundary: i32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatPolicy::default(),
            offline_buffer_depth: 4096,
            compress_threshold: im_protocol::frame::DEFAULT_COMPRESS_THRESHOLD,
            group_id_boundary: im_protocol::GROUP_ID_BOUNDARY,
        }
    }
}

impl CoreConfig {
    /// Configuration for integration tests that want the watchdog to
    /// trip within the lifetime of a test, not after 30 real seconds.
    pub fn fast_heartbeat_for_tests() -> Self {
        Self {
            heartbeat: HeartbeatPolicy::enabled(
                Duration::from_millis(20),
                Duration::from_millis(100),
            ),
            ..Self::default()
        }
    }
}
