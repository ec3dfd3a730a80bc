//! Reachability gate configuration

use super::defaults::*;
use super::{env_millis, env_secs, EnvLookup};
use crate::error::{DarksiteError, DarksiteResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Overall time budget before the gate gives up (non-fatal)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Pause between polling ticks
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Per-attempt TCP connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Timeout for the route lookup and handshake ping helpers
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// How often to log the hosts still pending
    #[serde(with = "humantime_serde")]
    pub progress_interval: Duration,

    /// Administrative (ssh) port
    pub admin_port: u16,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            timeout: duration_secs(DEFAULT_REACHABILITY_TIMEOUT_SECS),
            tick_interval: duration_ms(DEFAULT_GATE_TICK_MS),
            connect_timeout: duration_ms(DEFAULT_GATE_CONNECT_TIMEOUT_MS),
            probe_timeout: duration_secs(DEFAULT_GATE_PROBE_TIMEOUT_SECS),
            progress_interval: duration_secs(DEFAULT_GATE_PROGRESS_SECS),
            admin_port: DEFAULT_ADMIN_PORT,
        }
    }
}

impl GateConfig {
    pub(crate) fn apply_env(&mut self, env: EnvLookup<'_>) -> DarksiteResult<()> {
        self.timeout = env_secs(env, "DARKSITE_REACHABILITY_TIMEOUT", self.timeout)?;
        self.tick_interval = env_millis(env, "DARKSITE_GATE_TICK_MS", self.tick_interval)?;
        Ok(())
    }

    pub fn validate(&self) -> DarksiteResult<()> {
        if self.connect_timeout.is_zero() {
            return Err(DarksiteError::ConfigError(
                "gate connect_timeout must be non-zero".to_string(),
            ));
        }
        if self.admin_port == 0 {
            return Err(DarksiteError::ConfigError(
                "gate admin_port must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
