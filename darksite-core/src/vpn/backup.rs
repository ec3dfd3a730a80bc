//! Capped backup chain for plane configs
//!
//! Backups live next to the config as `<name>.bak.<UTC timestamp>`. The
//! timestamp format sorts lexicographically in time order, so the oldest
//! backup is always first.

use crate::error::{DarksiteError, DarksiteResult};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Existing backups of `conf_path`, oldest first
pub fn list_backups(conf_path: &Path) -> DarksiteResult<Vec<PathBuf>> {
    let pattern = format!(
        "{}.bak.*",
        glob::Pattern::escape(&conf_path.to_string_lossy())
    );
    let mut backups: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| DarksiteError::Internal {
            message: format!("invalid backup pattern {}: {}", pattern, e),
        })?
        .filter_map(Result::ok)
        .filter(|path| path.is_file())
        .collect();
    backups.sort();
    Ok(backups)
}

/// Delete the oldest backups until at most `max_backups` remain
pub async fn prune(conf_path: &Path, max_backups: usize) -> DarksiteResult<usize> {
    let backups = list_backups(conf_path)?;
    let excess = backups.len().saturating_sub(max_backups);
    let mut removed = 0;
    for old in backups.iter().take(excess) {
        match tokio::fs::remove_file(old).await {
            Ok(()) => {
                debug!("Deleted old backup {}", old.display());
                removed += 1;
            }
            Err(e) => warn!("failed to delete old backup {}: {}", old.display(), e),
        }
    }
    Ok(removed)
}

fn backup_path(conf_path: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string();
    let base = format!("{}.bak.{}", conf_path.to_string_lossy(), stamp);
    let mut candidate = PathBuf::from(&base);
    let mut suffix = 1;
    while candidate.exists() {
        candidate = PathBuf::from(format!("{}-{}", base, suffix));
        suffix += 1;
    }
    candidate
}

/// Snapshot `conf_path` before it is overwritten.
///
/// Keeps at most `keep` backups including the new one; `keep == 0` disables
/// backups entirely.
pub async fn rotate(conf_path: &Path, keep: usize) -> DarksiteResult<Option<PathBuf>> {
    if keep == 0 || !conf_path.is_file() {
        return Ok(None);
    }

    prune(conf_path, keep - 1).await?;

    let target = backup_path(conf_path);
    tokio::fs::copy(conf_path, &target)
        .await
        .map_err(|e| DarksiteError::file("backup", &target, e))?;
    info!("Backed up {} to {}", conf_path.display(), target.display());
    Ok(Some(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_rotation_is_capped() {
        let dir = TempDir::new().unwrap();
        let conf = dir.path().join("wg1.conf");
        std::fs::write(&conf, "v0").unwrap();

        for version in 1..=6 {
            rotate(&conf, 3).await.unwrap();
            std::fs::write(&conf, format!("v{}", version)).unwrap();
        }

        let backups = list_backups(&conf).unwrap();
        assert_eq!(backups.len(), 3);
        let contents: Vec<String> = backups
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap())
            .collect();
        assert_eq!(contents, vec!["v3", "v4", "v5"]);
    }

    #[tokio::test]
    async fn test_zero_keep_disables_backups() {
        let dir = TempDir::new().unwrap();
        let conf = dir.path().join("wg1.conf");
        std::fs::write(&conf, "v0").unwrap();

        assert!(rotate(&conf, 0).await.unwrap().is_none());
        assert!(list_backups(&conf).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_planes_untouched() {
        let dir = TempDir::new().unwrap();
        let wg1 = dir.path().join("wg1.conf");
        let wg10 = dir.path().join("wg10.conf");
        std::fs::write(&wg1, "a").unwrap();
        std::fs::write(&wg10, "b").unwrap();

        rotate(&wg10, 2).await.unwrap();
        rotate(&wg1, 1).await.unwrap();
        rotate(&wg1, 1).await.unwrap();

        assert_eq!(list_backups(&wg1).unwrap().len(), 1);
        assert_eq!(list_backups(&wg10).unwrap().len(), 1);
    }

    #[test]
    fn test_backup_names_sort_in_time_order() {
        let dir = TempDir::new().unwrap();
        let conf = dir.path().join("wg1.conf");
        let first = backup_path(&conf);
        std::fs::write(&first, "").unwrap();
        let second = backup_path(&conf);
        assert_ne!(first, second);
        assert!(first < second);
    }
}
