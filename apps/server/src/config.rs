//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP/WS server to.
    /// Override: `PORT`
    pub port: u16,

    /// Speech provider region.
    /// Override: `SPEECH_SERVICE_REGION`
    pub region: String,

    /// Speech provider subscription key.
    /// Override: `SPEECH_SERVICE_KEY`
    pub subscription_key: String,

    /// Interval in seconds between idle-eviction sweeps.
    pub sweep_interval_secs: u64,

    /// Idle seconds after which a session is evicted.
    pub max_idle_secs: u64,

    /// CORS origin allowlist. Empty admits any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let session = lingo_core::SessionConfig::default();
        Self {
            port: 8080,
            region: String::new(),
            subscription_key: String::new(),
            sweep_interval_secs: session.sweep_interval_secs,
            max_idle_secs: session.max_idle_secs,
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }

        if let Ok(val) = std::env::var("SPEECH_SERVICE_REGION") {
            if !val.is_empty() {
                self.region = val;
            }
        }

        if let Ok(val) = std::env::var("SPEECH_SERVICE_KEY") {
            if !val.is_empty() {
                self.subscription_key = val;
            }
        }
    }

    /// Converts to lingo-core's Config type.
    pub fn to_core_config(&self) -> lingo_core::Config {
        lingo_core::Config {
            region: self.region.clone(),
            subscription_key: self.subscription_key.clone(),
            upstream_endpoint: None,
            preferred_port: self.port,
            session: lingo_core::SessionConfig {
                sweep_interval_secs: self.sweep_interval_secs,
                max_idle_secs: self.max_idle_secs,
                ..Default::default()
            },
            allowed_origins: self.allowed_origins.clone(),
        }
    }
}
