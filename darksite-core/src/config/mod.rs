//! Configuration for a darksite convergence run
//!
//! The configuration is built exactly once at startup: defaults, then an
//! optional TOML file, then `DARKSITE_*` environment overrides, then
//! validation. The resulting value is immutable and handed to every component.

use crate::error::{DarksiteError, DarksiteResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub mod defaults;
pub mod gate;
pub mod mesh;
pub mod playbook;
pub mod ssh;
pub mod vpn;

pub use defaults::*;
pub use gate::GateConfig;
pub use mesh::MeshConfig;
pub use playbook::PlaybookConfig;
pub use ssh::{HostKeyPolicy, SshConfig};
pub use vpn::VpnConfig;

/// Source of environment-style overrides.
///
/// `from_env` uses the process environment; tests pass a map lookup.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DarksiteConfig {
    /// Candidate seed documents, first existing wins
    pub seed_paths: Vec<PathBuf>,

    /// Pause before doing anything, lets the rest of the fleet boot
    #[serde(with = "humantime_serde")]
    pub post_boot_pause: Duration,

    /// Propagate hub-phase failures as a non-zero exit
    pub strict: bool,

    pub mesh: MeshConfig,
    pub vpn: VpnConfig,
    pub ssh: SshConfig,
    pub gate: GateConfig,
    pub playbook: PlaybookConfig,
}

impl Default for DarksiteConfig {
    fn default() -> Self {
        Self {
            seed_paths: DEFAULT_SEED_PATHS.iter().map(PathBuf::from).collect(),
            post_boot_pause: duration_secs(DEFAULT_POST_BOOT_PAUSE_SECS),
            strict: false,
            mesh: MeshConfig::default(),
            vpn: VpnConfig::default(),
            ssh: SshConfig::default(),
            gate: GateConfig::default(),
            playbook: PlaybookConfig::default(),
        }
    }
}

impl DarksiteConfig {
    /// Build the run configuration: optional file, then process environment
    pub fn load(file: Option<&Path>) -> DarksiteResult<Self> {
        let config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env_overrides(&|key: &str| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> DarksiteResult<Self> {
        let config = Self::default().with_env_overrides(&|key: &str| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file; unspecified keys keep their defaults
    pub fn from_file(path: &Path) -> DarksiteResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DarksiteError::file("read config", path, e))?;
        toml::from_str(&content).map_err(|e| {
            DarksiteError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply `DARKSITE_*` overrides from the given lookup
    pub fn with_env_overrides(mut self, env: EnvLookup<'_>) -> DarksiteResult<Self> {
        if let Some(seed) = env("DARKSITE_SEED") {
            self.seed_paths = vec![PathBuf::from(seed)];
        }
        self.post_boot_pause = env_secs(env, "DARKSITE_POST_BOOT_PAUSE", self.post_boot_pause)?;
        self.strict = env_bool(env, "DARKSITE_STRICT", self.strict)?;

        self.mesh.apply_env(env)?;
        self.vpn.apply_env(env)?;
        self.ssh.apply_env(env)?;
        self.gate.apply_env(env)?;
        self.playbook.apply_env(env)?;
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> DarksiteResult<()> {
        if self.seed_paths.is_empty() {
            return Err(DarksiteError::ConfigError(
                "at least one seed path is required".to_string(),
            ));
        }

        self.mesh.validate()?;
        self.vpn.validate()?;
        self.ssh.validate()?;
        self.gate.validate()?;
        self.playbook.validate()?;
        Ok(())
    }
}

pub(crate) fn env_parse<T>(env: EnvLookup<'_>, key: &str, current: T) -> DarksiteResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map_err(|e| {
            DarksiteError::ConfigError(format!("Invalid {}='{}': {}", key, raw, e))
        }),
        _ => Ok(current),
    }
}

pub(crate) fn env_bool(env: EnvLookup<'_>, key: &str, current: bool) -> DarksiteResult<bool> {
    match env(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "" => Ok(current),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(DarksiteError::ConfigError(format!(
                "Invalid {}='{}': expected 1/0, true/false or yes/no",
                key, raw
            ))),
        },
        None => Ok(current),
    }
}

pub(crate) fn env_secs(env: EnvLookup<'_>, key: &str, current: Duration) -> DarksiteResult<Duration> {
    match env(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| DarksiteError::ConfigError(format!("Invalid {}='{}': {}", key, raw, e))),
        _ => Ok(current),
    }
}

pub(crate) fn env_millis(
    env: EnvLookup<'_>,
    key: &str,
    current: Duration,
) -> DarksiteResult<Duration> {
    match env(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| DarksiteError::ConfigError(format!("Invalid {}='{}': {}", key, raw, e))),
        _ => Ok(current),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_validation() {
        let config = DarksiteConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mesh.expected_minions, 15);
        assert!(config.mesh.require_all);
        assert_eq!(config.vpn.backup_keep, 10);
        assert_eq!(config.gate.timeout, Duration::from_secs(180));
        assert_eq!(config.ssh.host_key_policy, HostKeyPolicy::AcceptNew);
        assert!(!config.strict);
    }

    #[test]
    fn test_env_overrides() {
        let env = lookup(&[
            ("DARKSITE_EXPECTED_MINIONS", "3"),
            ("DARKSITE_REQUIRE_ALL_MINIONS", "0"),
            ("DARKSITE_WG_BACKUP_KEEP", "4"),
            ("DARKSITE_STRICT", "yes"),
            ("DARKSITE_HOST_KEY_POLICY", "strict"),
            ("DARKSITE_REACHABILITY_TIMEOUT", "30"),
            ("DARKSITE_KNOWN_HOSTS", "/tmp/kh"),
            ("DARKSITE_PLANES", "wg1, wg3"),
            ("DARKSITE_SEED", "/tmp/seed.json"),
            ("DARKSITE_GATE_TICK_MS", "250"),
            ("DARKSITE_KEYSCAN_TIMEOUT", "9"),
        ]);
        let config = DarksiteConfig::default().with_env_overrides(&env).unwrap();

        assert_eq!(config.mesh.expected_minions, 3);
        assert!(!config.mesh.require_all);
        assert_eq!(config.vpn.backup_keep, 4);
        assert!(config.strict);
        assert_eq!(config.ssh.host_key_policy, HostKeyPolicy::Strict);
        assert_eq!(config.gate.timeout, Duration::from_secs(30));
        assert_eq!(config.ssh.known_hosts, PathBuf::from("/tmp/kh"));
        assert_eq!(
            config.vpn.planes,
            Some(vec!["wg1".to_string(), "wg3".to_string()])
        );
        assert_eq!(config.seed_paths, vec![PathBuf::from("/tmp/seed.json")]);
        assert_eq!(config.gate.tick_interval, Duration::from_millis(250));
        assert_eq!(config.ssh.keyscan_timeout, Duration::from_secs(9));
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_reads_process_environment() {
        std::env::set_var("DARKSITE_EXPECTED_MINIONS", "7");
        std::env::set_var("DARKSITE_WG_DIR", "/tmp/wg-test");
        let config = DarksiteConfig::from_env();
        std::env::remove_var("DARKSITE_EXPECTED_MINIONS");
        std::env::remove_var("DARKSITE_WG_DIR");

        let config = config.unwrap();
        assert_eq!(config.mesh.expected_minions, 7);
        assert_eq!(config.vpn.wg_dir, PathBuf::from("/tmp/wg-test"));
    }

    #[test]
    #[serial_test::serial]
    fn test_load_without_file_uses_defaults() {
        std::env::remove_var("DARKSITE_EXPECTED_MINIONS");
        let config = DarksiteConfig::load(None).unwrap();
        assert_eq!(config.mesh.expected_minions, DEFAULT_EXPECTED_MINIONS);
    }

    #[test]
    fn test_invalid_env_values_are_rejected() {
        let env = lookup(&[("DARKSITE_EXPECTED_MINIONS", "many")]);
        let err = DarksiteConfig::default().with_env_overrides(&env).unwrap_err();
        assert!(err.to_string().contains("DARKSITE_EXPECTED_MINIONS"));

        let env = lookup(&[("DARKSITE_STRICT", "maybe")]);
        assert!(DarksiteConfig::default().with_env_overrides(&env).is_err());
    }

    #[test]
    fn test_toml_layering_keeps_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("darksite.toml");
        std::fs::write(
            &path,
            r#"
strict = true
post_boot_pause = "2s"

[mesh]
expected_minions = 4

[gate]
timeout = "45s"
"#,
        )
        .unwrap();

        let config = DarksiteConfig::from_file(&path).unwrap();
        assert!(config.strict);
        assert_eq!(config.post_boot_pause, Duration::from_secs(2));
        assert_eq!(config.mesh.expected_minions, 4);
        assert_eq!(config.gate.timeout, Duration::from_secs(45));
        assert_eq!(config.mesh.ping_retries, DEFAULT_MESH_PING_RETRIES);
        assert_eq!(config.vpn.wg_dir, PathBuf::from(DEFAULT_WG_DIR));
    }
}
