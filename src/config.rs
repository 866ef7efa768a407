//! Configuration management for Floodgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration for the Floodgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Background sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Path to a preset override file (YAML)
    pub presets_path: Option<String>,

    /// Preset names bound to each route group at startup
    #[serde(default)]
    pub routes: RouteLimits,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            presets_path: None,
            routes: RouteLimits::default(),
        }
    }
}

impl RateLimitingConfig {
    /// The sweep interval as a duration, floored at one second.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn default_sweep_interval() -> u64 {
    60
}

/// Which preset each route group uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteLimits {
    /// General traffic
    #[serde(default = "default_general_preset")]
    pub general: String,

    /// Public API routes
    #[serde(default = "default_api_preset")]
    pub api: String,

    /// Authentication routes
    #[serde(default = "default_auth_preset")]
    pub auth: String,
}

impl Default for RouteLimits {
    fn default() -> Self {
        Self {
            general: default_general_preset(),
            api: default_api_preset(),
            auth: default_auth_preset(),
        }
    }
}

fn default_general_preset() -> String {
    "moderate".to_string()
}

fn default_api_preset() -> String {
    "api".to_string()
}

fn default_auth_preset() -> String {
    "auth".to_string()
}

impl FloodgateConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: FloodgateConfig = serde_yaml::from_str(&contents)
            .map_err(|e| crate::error::FloodgateError::Config(e.to_string()))?;
        Ok(config)
    }
}
