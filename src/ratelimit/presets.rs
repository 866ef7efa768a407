//! Named rate limit presets.
//!
//! Presets are configuration values, not code paths: each one is just a
//! `max_requests`/`window`/`key_by` triple under a well-known name. The
//! built-in set covers the common call sites (general traffic, public API,
//! authentication endpoints) and can be extended or overridden from a YAML
//! file at startup. The resulting [`Presets`] value is immutable; it is
//! constructed once and passed explicitly into whatever wires limiters up.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{FloodgateError, Result};

use super::key::KeyStrategy;
use super::limiter::PolicyConfig;

/// Upper bound on configured windows, keeping timestamp arithmetic in range.
const MAX_WINDOW_SECS: u64 = 31_536_000; // one year

/// A single named preset as it appears in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetRule {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Window length in seconds
    pub window_secs: u64,
    /// Key derivation strategy
    #[serde(default = "default_key_by")]
    pub key_by: KeyStrategy,
}

fn default_key_by() -> KeyStrategy {
    KeyStrategy::ClientAddr
}

impl PresetRule {
    fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
            key_by: default_key_by(),
        }
    }

    /// Build the policy configuration this rule describes.
    pub fn policy(&self) -> PolicyConfig {
        PolicyConfig::new(
            self.max_requests,
            Duration::from_secs(self.window_secs),
            self.key_by,
        )
    }
}

/// The set of named presets available to the server wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Presets {
    /// Map of preset name to rule
    #[serde(default)]
    pub presets: HashMap<String, PresetRule>,
}

impl Default for Presets {
    fn default() -> Self {
        let mut presets = HashMap::new();
        presets.insert("strict".to_string(), PresetRule::new(10, 60));
        presets.insert("moderate".to_string(), PresetRule::new(60, 60));
        presets.insert("relaxed".to_string(), PresetRule::new(300, 60));
        presets.insert("api".to_string(), PresetRule::new(1000, 3600));
        presets.insert("auth".to_string(), PresetRule::new(5, 900));
        Self { presets }
    }
}

impl Presets {
    /// Load presets from a YAML file, layering the file's entries over the
    /// built-in defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit presets");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load presets from a YAML string, layering the parsed entries over
    /// the built-in defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let loaded: Presets = serde_yaml::from_str(yaml).map_err(|e| {
            FloodgateError::Config(format!("Failed to parse rate limit presets: {}", e))
        })?;

        let mut merged = Presets::default();
        merged.presets.extend(loaded.presets);
        merged.validate()?;
        Ok(merged)
    }

    /// Look up a preset by name and build its policy configuration.
    pub fn get(&self, name: &str) -> Option<PolicyConfig> {
        self.presets.get(name).map(PresetRule::policy)
    }

    fn validate(&self) -> Result<()> {
        for (name, rule) in &self.presets {
            if rule.max_requests == 0 {
                return Err(FloodgateError::Config(format!(
                    "Preset '{}': max_requests must be positive",
                    name
                )));
            }
            if rule.window_secs == 0 || rule.window_secs > MAX_WINDOW_SECS {
                return Err(FloodgateError::Config(format!(
                    "Preset '{}': window_secs must be between 1 and {}",
                    name, MAX_WINDOW_SECS
                )));
            }
        }
        Ok(())
    }
}
