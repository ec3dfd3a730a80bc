//! Isolated known_hosts store for the configuration engine
//!
//! Host keys are collected with plain (unhashed) `ssh-keyscan` output so the
//! same key scanned twice produces the same line and merges away. The store
//! is merged across runs, never truncated, and never a per-user file.

use crate::common::{ensure_dir, read_optional_text, set_owner, write_atomic};
use crate::config::SshConfig;
use crate::error::{DarksiteError, DarksiteResult};
use crate::exec::{CommandExecutor, CommandSpec};
use crate::inventory::{scan_names, InventoryTarget};
use std::collections::HashSet;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Summary of one seeding pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KnownHostsReport {
    /// Names handed to ssh-keyscan
    pub scanned: usize,
    /// Lines not previously in the store
    pub added: usize,
    pub total: usize,
}

/// Merge `discovered` lines into `existing`, dropping blanks and exact duplicates
pub fn merge(existing: &str, discovered: &[String]) -> (String, usize) {
    let mut seen = HashSet::new();
    let mut lines = Vec::new();
    for line in existing.lines().map(str::trim_end) {
        if !line.trim().is_empty() && seen.insert(line.to_string()) {
            lines.push(line.to_string());
        }
    }
    let before = lines.len();
    for line in discovered.iter().map(|l| l.trim_end()) {
        if !line.trim().is_empty() && seen.insert(line.to_string()) {
            lines.push(line.to_string());
        }
    }
    let added = lines.len() - before;

    let mut text = lines.join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    (text, added)
}

/// Host key lines from ssh-keyscan output, comments dropped
fn key_lines(output: &str) -> impl Iterator<Item = String> + '_ {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
}

pub struct KnownHostsSeeder {
    config: SshConfig,
    executor: Arc<dyn CommandExecutor>,
}

impl KnownHostsSeeder {
    pub fn new(config: SshConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { config, executor }
    }

    async fn keyscan(&self, name: &str) -> Vec<String> {
        let timeout = self.config.keyscan_timeout;
        let spec = CommandSpec::new("ssh-keyscan")
            .arg("-T")
            .arg(timeout.as_secs().max(1).to_string())
            .arg(name)
            .timeout(timeout + Duration::from_secs(5));
        match self.executor.execute(&spec).await {
            Ok(output) => {
                let lines: Vec<String> =
                    key_lines(&String::from_utf8_lossy(&output.stdout)).collect();
                if lines.is_empty() {
                    debug!(host = %name, rc = ?output.exit_code, "no host keys returned");
                }
                lines
            }
            Err(e) => {
                debug!(host = %name, "ssh-keyscan failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Scan every target hostname and address and merge the keys into the store
    pub async fn seed(&self, targets: &[InventoryTarget]) -> DarksiteResult<KnownHostsReport> {
        let path = &self.config.known_hosts;
        let user = self.config.service_user.as_str();

        if let Some(dir) = path.parent() {
            ensure_dir(dir, 0o700).await?;
            if let Err(e) = set_owner(dir, user) {
                warn!("could not hand {} to {}: {}", dir.display(), user, e);
            }
        }

        let names = scan_names(targets);
        if names.is_empty() {
            warn!("no inventory targets found; known_hosts gets no new entries");
        } else {
            info!(entries = names.len(), "Seeding known_hosts {}", path.display());
        }

        let mut discovered = Vec::new();
        for name in &names {
            discovered.extend(self.keyscan(name).await);
        }

        let existing = read_optional_text(path, "known_hosts").await?;
        let (merged, added) = merge(existing.as_deref().unwrap_or_default(), &discovered);
        if existing.as_deref() != Some(merged.as_str()) {
            write_atomic(path, merged.as_bytes(), 0o600)?;
        }
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|e| DarksiteError::file("chmod", path, e))?;
        if let Err(e) = set_owner(path, user) {
            warn!("could not hand {} to {}: {}", path.display(), user, e);
        }

        let report = KnownHostsReport {
            scanned: names.len(),
            added,
            total: merged.lines().count(),
        };
        info!(
            scanned = report.scanned,
            added = report.added,
            total = report.total,
            "known_hosts seeded"
        );
        Ok(report)
    }
}
