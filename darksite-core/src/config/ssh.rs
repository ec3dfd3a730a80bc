//! SSH trust configuration

use super::defaults::*;
use super::{env_secs, EnvLookup};
use crate::error::{DarksiteError, DarksiteResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How ssh treats host keys it finds in (or misses from) the isolated store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Only hosts already in the store are accepted
    Strict,
    /// Unknown hosts are added, changed keys are refused
    AcceptNew,
    /// No verification
    Off,
}

impl HostKeyPolicy {
    /// Value for ssh's `StrictHostKeyChecking` option
    pub fn ssh_option(&self) -> &'static str {
        match self {
            HostKeyPolicy::Strict => "yes",
            HostKeyPolicy::AcceptNew => "accept-new",
            HostKeyPolicy::Off => "no",
        }
    }
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostKeyPolicy::Strict => "strict",
            HostKeyPolicy::AcceptNew => "accept-new",
            HostKeyPolicy::Off => "off",
        };
        f.write_str(name)
    }
}

impl FromStr for HostKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "yes" => Ok(HostKeyPolicy::Strict),
            "accept-new" | "accept_new" => Ok(HostKeyPolicy::AcceptNew),
            "off" | "no" => Ok(HostKeyPolicy::Off),
            other => Err(format!(
                "unknown host key policy '{}' (expected strict, accept-new or off)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Automation account used by the configuration engine
    pub service_user: String,

    /// Home directory of the automation account
    pub service_home: PathBuf,

    /// Isolated known_hosts store; never a per-user file
    pub known_hosts: PathBuf,

    pub host_key_policy: HostKeyPolicy,

    /// Per-host `ssh-keyscan -T` timeout
    #[serde(with = "humantime_serde")]
    pub keyscan_timeout: Duration,

    /// Drop-in directory for the passwordless sudo grant
    pub sudoers_dir: PathBuf,

    /// Controller-side directories the automation account must be able to write
    pub artifact_dirs: Vec<PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            service_user: DEFAULT_SERVICE_USER.to_string(),
            service_home: PathBuf::from(DEFAULT_SERVICE_HOME),
            known_hosts: PathBuf::from(DEFAULT_KNOWN_HOSTS),
            host_key_policy: HostKeyPolicy::AcceptNew,
            keyscan_timeout: duration_secs(DEFAULT_KEYSCAN_TIMEOUT_SECS),
            sudoers_dir: PathBuf::from(DEFAULT_SUDOERS_DIR),
            artifact_dirs: DEFAULT_ARTIFACT_DIRS.iter().map(PathBuf::from).collect(),
        }
    }
}

impl SshConfig {
    pub(crate) fn apply_env(&mut self, env: EnvLookup<'_>) -> DarksiteResult<()> {
        if let Some(user) = env("DARKSITE_SERVICE_USER") {
            self.service_home = PathBuf::from("/home").join(&user);
            self.service_user = user;
        }
        if let Some(path) = env("DARKSITE_KNOWN_HOSTS") {
            self.known_hosts = PathBuf::from(path);
        }
        if let Some(policy) = env("DARKSITE_HOST_KEY_POLICY") {
            self.host_key_policy = policy.parse().map_err(|e| {
                DarksiteError::ConfigError(format!("Invalid DARKSITE_HOST_KEY_POLICY: {}", e))
            })?;
        }
        self.keyscan_timeout = env_secs(env, "DARKSITE_KEYSCAN_TIMEOUT", self.keyscan_timeout)?;
        Ok(())
    }

    pub fn ssh_dir(&self) -> PathBuf {
        self.service_home.join(".ssh")
    }

    pub fn private_key(&self) -> PathBuf {
        self.ssh_dir().join("id_ed25519")
    }

    pub fn public_key(&self) -> PathBuf {
        self.ssh_dir().join("id_ed25519.pub")
    }

    pub fn validate(&self) -> DarksiteResult<()> {
        let user_ok = !self.service_user.is_empty()
            && self
                .service_user
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !user_ok {
            return Err(DarksiteError::ConfigError(format!(
                "invalid service user '{}'",
                self.service_user
            )));
        }
        if !self.known_hosts.is_absolute() {
            return Err(DarksiteError::ConfigError(format!(
                "known_hosts path must be absolute: {}",
                self.known_hosts.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_key_policy_parsing() {
        assert_eq!("strict".parse::<HostKeyPolicy>(), Ok(HostKeyPolicy::Strict));
        assert_eq!("Accept-New".parse::<HostKeyPolicy>(), Ok(HostKeyPolicy::AcceptNew));
        assert_eq!("off".parse::<HostKeyPolicy>(), Ok(HostKeyPolicy::Off));
        assert!("sometimes".parse::<HostKeyPolicy>().is_err());
        assert_eq!(HostKeyPolicy::AcceptNew.ssh_option(), "accept-new");
    }

    #[test]
    fn test_key_paths_follow_home() {
        let config = SshConfig::default();
        assert_eq!(
            config.private_key(),
            PathBuf::from("/home/ansible/.ssh/id_ed25519")
        );
        assert_eq!(
            config.public_key(),
            PathBuf::from("/home/ansible/.ssh/id_ed25519.pub")
        );
    }

    #[test]
    fn test_rejects_shell_metacharacters_in_user() {
        let config = SshConfig {
            service_user: "ansible;id".to_string(),
            ..SshConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
