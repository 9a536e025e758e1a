//! Core application configuration types.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    INGRESS_CAPACITY_CHUNKS, MAX_CONCURRENT_SESSIONS, SESSION_MAX_IDLE_SECS, SWEEP_INTERVAL_SECS,
};
use crate::upstream::connection::{UpstreamCredentials, UpstreamSettings};

/// Configuration for streaming-session behavior.
///
/// Groups the parameters that control idle eviction and per-session
/// buffering.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    /// Maximum number of concurrent streaming sessions.
    pub max_sessions: usize,

    /// Interval between idle-eviction sweeps (seconds).
    pub sweep_interval_secs: u64,

    /// Idle time after which a session is evicted (seconds).
    pub max_idle_secs: u64,

    /// Capacity of the audio ingress buffer (chunks).
    pub ingress_capacity: usize,
}

impl SessionConfig {
    /// Creates a new `SessionConfig` with validated values.
    ///
    /// # Errors
    ///
    /// Returns an error if any value would cause runtime issues.
    pub fn new(
        max_sessions: usize,
        sweep_interval_secs: u64,
        max_idle_secs: u64,
        ingress_capacity: usize,
    ) -> Result<Self, String> {
        let config = Self {
            max_sessions,
            sweep_interval_secs,
            max_idle_secs,
            ingress_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_sessions == 0 {
            return Err("max_sessions must be >= 1".to_string());
        }
        if self.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be >= 1".to_string());
        }
        if self.max_idle_secs == 0 {
            return Err("max_idle_secs must be >= 1".to_string());
        }
        if self.ingress_capacity == 0 {
            return Err("ingress_capacity must be >= 1 (mpsc::channel panics on 0)".to_string());
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: MAX_CONCURRENT_SESSIONS,
            sweep_interval_secs: SWEEP_INTERVAL_SECS,
            max_idle_secs: SESSION_MAX_IDLE_SECS,
            ingress_capacity: INGRESS_CAPACITY_CHUNKS,
        }
    }
}

/// Configuration for the Lingo Relay service.
///
/// Credentials and region are required; everything else has defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Speech provider region (`japaneast`, `westus2`, …).
    pub region: String,

    /// Speech provider subscription key.
    pub subscription_key: String,

    /// Full upstream endpoint override (sovereign clouds, private
    /// endpoints). Normally unset; the regional public endpoint is used.
    #[serde(default)]
    pub upstream_endpoint: Option<String>,

    /// Port for the HTTP/WS server (0 = auto-allocate).
    pub preferred_port: u16,

    /// Streaming-session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// CORS allowlist. Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Validates that required settings are present.
    pub fn validate(&self) -> Result<(), String> {
        if self.region.trim().is_empty() {
            return Err("region must be set (SPEECH_SERVICE_REGION)".to_string());
        }
        if self.subscription_key.trim().is_empty() {
            return Err("subscription key must be set (SPEECH_SERVICE_KEY)".to_string());
        }
        self.session.validate()
    }

    /// Builds upstream dial settings from these credentials.
    #[must_use]
    pub fn upstream_settings(&self) -> UpstreamSettings {
        UpstreamSettings {
            region: self.region.clone(),
            endpoint: self.upstream_endpoint.clone(),
            credentials: UpstreamCredentials {
                subscription_key: self.subscription_key.clone(),
                bearer_token: None,
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: String::new(),
            subscription_key: String::new(),
            upstream_endpoint: None,
            preferred_port: 8080,
            session: SessionConfig::default(),
            allowed_origins: Vec::new(),
        }
    }
}
