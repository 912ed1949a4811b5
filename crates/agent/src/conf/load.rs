//! Load — config loading from file and environment variables.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::model::AgentConfig;

const DEFAULT_CONFIG_PATH: &str = "/etc/logtap/logtap.toml";

impl AgentConfig {
    /// Load configuration from file or environment variables
    /// Priority: Environment Variables > Config File > Defaults
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = std::env::var("LOGTAP_CONFIG_FILE")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!("Loading configuration from: {}", config_path);
            Self::from_file(&config_path)?
        } else {
            tracing::info!("Config file not found at {}, using defaults", config_path);
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: AgentConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Override fields from environment-style variables, looked up through
    /// `var` so tests don't have to touch the process environment.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(socket) = var("DOCKER_SOCKET") {
            self.docker_socket = socket;
        }
        if let Some(capacity) = var("LOGTAP_QUEUE_CAPACITY") {
            self.fanout.queue_capacity = capacity
                .parse()
                .map_err(|_| format!("LOGTAP_QUEUE_CAPACITY is not a number: {}", capacity))?;
        }
        if let Some(mode) = var("LOGTAP_OVERFLOW") {
            self.fanout.overflow = mode.parse()?;
        }
        if let Some(timeout) = var("LOGTAP_SEND_TIMEOUT_MS") {
            self.fanout.send_timeout_ms = timeout
                .parse()
                .map_err(|_| format!("LOGTAP_SEND_TIMEOUT_MS is not a number: {}", timeout))?;
        }
        if let Some(id) = var("LOGTAP_FILTER_ID") {
            self.filter.id = id;
        }
        if let Some(name) = var("LOGTAP_FILTER_NAME") {
            self.filter.name = name;
        }
        if let Some(fragment) = var("LOGTAP_FILTER_CONTAINS") {
            self.filter.contains = fragment;
        }
        Ok(())
    }

    /// Validate that configuration values are sane
    pub fn validate(&self) -> Result<(), String> {
        self.fanout.validate()
    }
}
