//! WireGuard plane configuration

use super::defaults::*;
use super::{env_parse, env_secs, EnvLookup};
use crate::error::{DarksiteError, DarksiteResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VpnConfig {
    /// Directory holding `<plane>.conf`, `<plane>.key` and `<plane>.pub`
    pub wg_dir: PathBuf,

    /// Planes to converge; `None` means every plane in the seed
    pub planes: Option<Vec<String>>,

    /// Prior config versions kept per plane (0 disables backups)
    pub backup_keep: usize,

    /// PersistentKeepalive written into every peer stanza
    pub keepalive: u16,

    /// Tunnel unit name, `{plane}` is substituted
    pub unit_template: String,

    /// Pause after plane restarts so routes and handshakes settle
    #[serde(with = "humantime_serde")]
    pub settle: Duration,

    /// Node name (or `<prefix>.*`) designating the hub when the seed has no `hub` key
    pub hub_prefix: String,
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            wg_dir: PathBuf::from(DEFAULT_WG_DIR),
            planes: None,
            backup_keep: DEFAULT_WG_BACKUP_KEEP,
            keepalive: DEFAULT_WG_KEEPALIVE_SECS,
            unit_template: DEFAULT_WG_UNIT_TEMPLATE.to_string(),
            settle: duration_secs(DEFAULT_WG_SETTLE_SECS),
            hub_prefix: DEFAULT_HUB_PREFIX.to_string(),
        }
    }
}

impl VpnConfig {
    pub(crate) fn apply_env(&mut self, env: EnvLookup<'_>) -> DarksiteResult<()> {
        if let Some(dir) = env("DARKSITE_WG_DIR") {
            self.wg_dir = PathBuf::from(dir);
        }
        if let Some(planes) = env("DARKSITE_PLANES") {
            let planes: Vec<String> = planes
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            self.planes = if planes.is_empty() { None } else { Some(planes) };
        }
        self.backup_keep = env_parse(env, "DARKSITE_WG_BACKUP_KEEP", self.backup_keep)?;
        self.settle = env_secs(env, "DARKSITE_WG_SETTLE", self.settle)?;
        Ok(())
    }

    /// Unit managing the tunnel for a plane
    pub fn unit_for(&self, plane: &str) -> String {
        self.unit_template.replace("{plane}", plane)
    }

    pub fn validate(&self) -> DarksiteResult<()> {
        if let Some(planes) = &self.planes {
            for plane in planes {
                validate_plane_id(plane)?;
            }
        }
        if !self.unit_template.contains("{plane}") {
            return Err(DarksiteError::ConfigError(format!(
                "unit_template '{}' must contain {{plane}}",
                self.unit_template
            )));
        }
        if self.hub_prefix.trim().is_empty() {
            return Err(DarksiteError::ConfigError(
                "hub_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Plane ids become file and unit names, so keep them to a safe alphabet
pub fn validate_plane_id(plane: &str) -> DarksiteResult<()> {
    let valid = !plane.is_empty()
        && plane.len() <= 15
        && plane
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DarksiteError::InvalidInput {
            field: "plane".to_string(),
            message: format!(
                "'{}' is not a valid interface name (1-15 chars of [A-Za-z0-9_-])",
                plane
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_id_validation() {
        assert!(validate_plane_id("wg1").is_ok());
        assert!(validate_plane_id("mgmt_plane-2").is_ok());
        assert!(validate_plane_id("").is_err());
        assert!(validate_plane_id("../etc").is_err());
        assert!(validate_plane_id("wg1; rm -rf /").is_err());
        assert!(validate_plane_id("a-very-long-interface-name").is_err());
    }

    #[test]
    fn test_unit_for() {
        let config = VpnConfig::default();
        assert_eq!(config.unit_for("wg2"), "wg-quick@wg2.service");
    }
}
