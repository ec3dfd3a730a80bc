//! Configuration engine (Ansible) settings

use super::defaults::*;
use super::{env_bool, EnvLookup};
use crate::error::{DarksiteError, DarksiteResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybookConfig {
    /// Working directory for every engine invocation
    pub base_dir: PathBuf,

    /// Inventory, relative to `base_dir` unless absolute
    pub inventory: PathBuf,

    /// Site playbook, relative to `base_dir` unless absolute
    pub site: PathBuf,

    /// Verbosity flag passed to the playbook run (`""`, `-v` .. `-vvvv`)
    pub verbosity: String,

    pub color: bool,

    /// Run the engine as the service account through sudo
    pub run_as_service_user: bool,

    #[serde(with = "humantime_serde")]
    pub ping_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub run_timeout: Duration,
}

impl Default for PlaybookConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_ANSIBLE_BASE),
            inventory: PathBuf::from(DEFAULT_ANSIBLE_INVENTORY),
            site: PathBuf::from(DEFAULT_ANSIBLE_SITE),
            verbosity: DEFAULT_ANSIBLE_VERBOSITY.to_string(),
            color: true,
            run_as_service_user: true,
            ping_timeout: duration_secs(DEFAULT_PLAYBOOK_PING_TIMEOUT_SECS),
            run_timeout: duration_secs(DEFAULT_PLAYBOOK_RUN_TIMEOUT_SECS),
        }
    }
}

impl PlaybookConfig {
    pub(crate) fn apply_env(&mut self, env: EnvLookup<'_>) -> DarksiteResult<()> {
        if let Some(base) = env("DARKSITE_ANSIBLE_BASE") {
            self.base_dir = PathBuf::from(base);
        }
        if let Some(verbosity) = env("DARKSITE_PLAYBOOK_VERBOSITY") {
            self.verbosity = verbosity.trim().to_string();
        }
        self.color = env_bool(env, "DARKSITE_PLAYBOOK_COLOR", self.color)?;
        Ok(())
    }

    pub fn inventory_path(&self) -> PathBuf {
        self.base_dir.join(&self.inventory)
    }

    pub fn site_path(&self) -> PathBuf {
        self.base_dir.join(&self.site)
    }

    pub fn validate(&self) -> DarksiteResult<()> {
        let v = self.verbosity.as_str();
        let valid = v.is_empty()
            || (v.starts_with('-') && v.len() <= 5 && v[1..].chars().all(|c| c == 'v') && v.len() > 1);
        if !valid {
            return Err(DarksiteError::ConfigError(format!(
                "invalid playbook verbosity '{}' (expected \"\", -v, -vv, -vvv or -vvvv)",
                self.verbosity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_paths_relative_to_base() {
        let config = PlaybookConfig::default();
        assert_eq!(
            config.inventory_path(),
            PathBuf::from("/srv/ansible/inventory/hosts.ini")
        );
        assert_eq!(config.site_path(), PathBuf::from("/srv/ansible/site.yml"));
    }

    #[test]
    fn test_verbosity_validation() {
        for ok in ["", "-v", "-vv", "-vvv", "-vvvv"] {
            let config = PlaybookConfig {
                verbosity: ok.to_string(),
                ..PlaybookConfig::default()
            };
            assert!(config.validate().is_ok(), "{ok} should be accepted");
        }
        for bad in ["-", "-vvvvv", "vvv", "-x", "-v; id"] {
            let config = PlaybookConfig {
                verbosity: bad.to_string(),
                ..PlaybookConfig::default()
            };
            assert!(config.validate().is_err(), "{bad} should be rejected");
        }
    }
}
