//! Model — AgentConfig and related structs.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::attach::filter::SubscriptionFilter;
use crate::logs::fanout::OverflowPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Docker socket; empty means the platform default.
    pub docker_socket: String,
    pub fanout: FanoutConfig,
    /// Which containers the `logtap` binary follows.
    pub filter: SubscriptionFilter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowMode {
    #[default]
    Block,
    BlockTimeout,
    DropNewest,
    Disconnect,
}

impl FromStr for OverflowMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "block" => Ok(OverflowMode::Block),
            "block_timeout" => Ok(OverflowMode::BlockTimeout),
            "drop_newest" => Ok(OverflowMode::DropNewest),
            "disconnect" => Ok(OverflowMode::Disconnect),
            other => Err(format!("unknown overflow mode: {}", other)),
        }
    }
}

/// Subscriber queue sizing and what happens when a queue fills up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    pub queue_capacity: usize,
    pub overflow: OverflowMode,
    /// Only used by `block_timeout`.
    pub send_timeout_ms: u64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            overflow: OverflowMode::Block,
            send_timeout_ms: 1000,
        }
    }
}

impl FanoutConfig {
    pub fn to_policy(&self) -> OverflowPolicy {
        match self.overflow {
            OverflowMode::Block => OverflowPolicy::Block,
            OverflowMode::BlockTimeout => {
                OverflowPolicy::BlockWithTimeout(Duration::from_millis(self.send_timeout_ms))
            }
            OverflowMode::DropNewest => OverflowPolicy::DropNewest,
            OverflowMode::Disconnect => OverflowPolicy::Disconnect,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.queue_capacity == 0 {
            return Err("fanout.queue_capacity must be > 0".to_string());
        }
        if self.overflow == OverflowMode::BlockTimeout && self.send_timeout_ms == 0 {
            return Err("fanout.send_timeout_ms must be > 0 when overflow is block_timeout".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_defaults() {
        let cfg = AgentConfig::default();
        assert!(cfg.docker_socket.is_empty(), "Default docker_socket should be empty (use system default)");
        assert_eq!(cfg.fanout.queue_capacity, 1024);
        assert_eq!(cfg.fanout.overflow, OverflowMode::Block);
        assert!(cfg.filter.is_match_all());
    }

    #[test]
    fn test_to_policy() {
        let mut fanout = FanoutConfig::default();
        assert_eq!(fanout.to_policy(), OverflowPolicy::Block);

        fanout.overflow = OverflowMode::BlockTimeout;
        fanout.send_timeout_ms = 250;
        assert_eq!(
            fanout.to_policy(),
            OverflowPolicy::BlockWithTimeout(Duration::from_millis(250))
        );

        fanout.overflow = OverflowMode::Disconnect;
        assert_eq!(fanout.to_policy(), OverflowPolicy::Disconnect);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let fanout = FanoutConfig { queue_capacity: 0, ..Default::default() };
        let err = fanout.validate().unwrap_err();
        assert!(err.contains("queue_capacity"), "Error should mention queue_capacity: {}", err);
    }

    #[test]
    fn test_validate_zero_timeout_only_matters_for_block_timeout() {
        let mut fanout = FanoutConfig { send_timeout_ms: 0, ..Default::default() };
        assert!(fanout.validate().is_ok());
        fanout.overflow = OverflowMode::BlockTimeout;
        assert!(fanout.validate().is_err());
    }

    #[test]
    fn test_overflow_mode_from_str() {
        assert_eq!("drop_newest".parse::<OverflowMode>(), Ok(OverflowMode::DropNewest));
        assert_eq!("BLOCK".parse::<OverflowMode>(), Ok(OverflowMode::Block));
        assert!("drop_oldest".parse::<OverflowMode>().is_err());
    }

    #[test]
    fn test_agent_config_deserialize_partial_toml() {
        let toml_str = r#"
            docker_socket = "unix:///run/docker.sock"

            [fanout]
            overflow = "disconnect"

            [filter]
            contains = "web"
        "#;
        let cfg: AgentConfig = toml::from_str(toml_str).expect("Should accept partial TOML");
        assert_eq!(cfg.docker_socket, "unix:///run/docker.sock");
        assert_eq!(cfg.fanout.overflow, OverflowMode::Disconnect);
        assert_eq!(cfg.fanout.queue_capacity, 1024); // default
        assert_eq!(cfg.filter.contains, "web");
        assert!(cfg.filter.id.is_empty());
    }
}
