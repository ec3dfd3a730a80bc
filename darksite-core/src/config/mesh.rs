//! Command mesh configuration

use super::defaults::*;
use super::{env_bool, env_parse, env_secs, EnvLookup};
use crate::error::{DarksiteError, DarksiteResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Command mesh (Salt) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Target expression addressing the whole fleet
    pub target: String,

    /// Number of minions expected to answer a liveness probe
    pub expected_minions: usize,

    /// Require `expected_minions` responders instead of at least one
    pub require_all: bool,

    /// Liveness probe attempts before giving up
    pub ping_retries: u32,

    /// Delay between liveness probes
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,

    /// Timeout for a single liveness probe
    #[serde(with = "humantime_serde")]
    pub ping_timeout: Duration,

    /// Add proportional jitter to the probe interval
    pub jitter: bool,

    /// Timeout for a single remote execution request
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,

    /// Extra attempts for a remote execution request with unparseable output
    pub call_retries: u32,

    /// Delay between remote execution attempts
    #[serde(with = "humantime_serde")]
    pub call_retry_delay: Duration,

    /// Mesh master CLI
    pub salt_bin: String,

    /// Local minion CLI
    pub salt_call_bin: String,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            target: DEFAULT_MESH_TARGET.to_string(),
            expected_minions: DEFAULT_EXPECTED_MINIONS,
            require_all: true,
            ping_retries: DEFAULT_MESH_PING_RETRIES,
            ping_interval: duration_secs(DEFAULT_MESH_PING_INTERVAL_SECS),
            ping_timeout: duration_secs(DEFAULT_MESH_PING_TIMEOUT_SECS),
            jitter: false,
            call_timeout: duration_secs(DEFAULT_MESH_CALL_TIMEOUT_SECS),
            call_retries: DEFAULT_MESH_CALL_RETRIES,
            call_retry_delay: duration_secs(DEFAULT_MESH_CALL_RETRY_DELAY_SECS),
            salt_bin: DEFAULT_SALT_BIN.to_string(),
            salt_call_bin: DEFAULT_SALT_CALL_BIN.to_string(),
        }
    }
}

impl MeshConfig {
    pub(crate) fn apply_env(&mut self, env: EnvLookup<'_>) -> DarksiteResult<()> {
        if let Some(target) = env("DARKSITE_MESH_TARGET") {
            self.target = target;
        }
        self.expected_minions = env_parse(env, "DARKSITE_EXPECTED_MINIONS", self.expected_minions)?;
        self.require_all = env_bool(env, "DARKSITE_REQUIRE_ALL_MINIONS", self.require_all)?;
        self.ping_retries = env_parse(env, "DARKSITE_MESH_PING_RETRIES", self.ping_retries)?;
        self.ping_interval = env_secs(env, "DARKSITE_MESH_PING_INTERVAL", self.ping_interval)?;
        self.jitter = env_bool(env, "DARKSITE_MESH_JITTER", self.jitter)?;
        Ok(())
    }

    /// Validate mesh configuration
    pub fn validate(&self) -> DarksiteResult<()> {
        if self.target.trim().is_empty() {
            return Err(DarksiteError::ConfigError(
                "mesh target must not be empty".to_string(),
            ));
        }
        if self.ping_retries == 0 {
            return Err(DarksiteError::ConfigError(
                "mesh ping_retries must be at least 1".to_string(),
            ));
        }
        if self.require_all && self.expected_minions == 0 {
            return Err(DarksiteError::ConfigError(
                "expected_minions must be non-zero when require_all is set".to_string(),
            ));
        }
        Ok(())
    }
}
