//! Server configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides
//! (the bind address and log level are the exception — see `main.rs`).
//! Default config path: `/etc/im-server/server.toml`.
//!
//! # Required fields
//! none — every field has a default suitable for local development.
//! Production deployments should still set `bind_addr` and
//! `sqlite_path` explicitly.

use std::path::Path;
use std::time::Duration;

use im_core::heartbeat::HeartbeatPolicy;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub sqlite_path: String,
    pub heartbeat: HeartbeatPolicy,
    pub offline_buffer_depth: usize,
    pub compress_threshold: usize,
    pub group_id_boundary: i32,
}

impl ServerConfig {
    pub fn to_core_config(&self) -> im_core::CoreConfig {
        im_core::CoreConfig {
            heartbeat: self.heartbeat,
            offline_buffer_depth: self.offline_buffer_depth,
            compress_threshold: self.compress_threshold,
            group_id_boundary: self.group_id_boundary,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    bind_addr: Option<String>,
    sqlite_path: Option<String>,
    heartbeat: Option<RawHeartbeatConfig>,
    offline_buffer_depth: Option<usize>,
    compress_threshold: Option<usize>,
    group_id_boundary: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
struct RawHeartbeatConfig {
    enabled: Option<bool>,
    check_interval_secs: Option<u64>,
    timeout_secs: Option<u64>,
}

pub fn load_config_from_path(path: &Path) -> Result<ServerConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

pub fn load_config_from_str(toml_str: &str) -> Result<ServerConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let heartbeat = match raw.heartbeat {
        Some(h) => {
            let enabled = h.enabled.unwrap_or(true);
            if enabled {
                HeartbeatPolicy::enabled(
                    Duration::from_secs(h.check_interval_secs.unwrap_or(5)),
                    Duration::from_secs(h.timeout_secs.unwrap_or(30)),
                )
            } else {
                HeartbeatPolicy::disabled()
            }
        }
        None => HeartbeatPolicy::default(),
    };

    let group_id_boundary = raw.group_id_boundary.unwrap_or(im_protocol::GROUP_ID_BOUNDARY);
    if group_id_boundary <= 0 {
        return Err(ConfigError::InvalidValue(format!(
            "group_id_boundary must be positive, got {group_id_boundary}"
        )));
    }

    Ok(ServerConfig {
        bind_addr: raw.bind_addr.unwrap_or_else(|| "0.0.0.0:9000".to_owned()),
        sqlite_path: raw.sqlite_path.unwrap_or_else(|| "/var/lib/im-server/server.sqlite3".to_owned()),
        heartbeat,
        offline_buffer_depth: raw.offline_buffer_depth.unwrap_or(4096),
        compress_threshold: raw.compress_threshold.unwrap_or(im_protocol::frame::DEFAULT_COMPRESS_THRESHOLD),
        group_id_boundary,
    })
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_every_default() {
        let cfg = load_config_from_str("").unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:9000");
        assert!(cfg.heartbeat.enabled);
        assert_eq!(cfg.offline_buffer_depth, 4096);
    }

    #[test]
    fn heartbeat_can_be_disabled() {
        let cfg = load_config_from_str("[heartbeat]\nenabled = false\n").unwrap();
        assert!(!cfg.heartbeat.enabled);
    }

    #[test]
    fn zero_group_id_boundary_is_rejected() {
        let err = load_config_from_str("group_id_boundary = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn bind_addr_and_heartbeat_timeout_are_overridable() {
        let cfg = load_config_from_str(
            "bind_addr = \"127.0.0.1:9001\"\n[heartbeat]\ncheck_interval_secs = 1\ntimeout_secs = 10\n",
        )
        .unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:9001");
        assert_eq!(cfg.heartbeat.timeout, Duration::from_secs(10));
    }
}
