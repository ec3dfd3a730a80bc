//! Per-plane WireGuard keypairs
//!
//! The private key never appears on a command line: `wg pubkey` receives it
//! on stdin.

use super::config_file::validate_wg_key;
use crate::common::{read_optional_text, write_atomic};
use crate::config::vpn::validate_plane_id;
use crate::error::{DarksiteError, DarksiteResult};
use crate::exec::{run_checked, CommandExecutor, CommandSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const WG_TIMEOUT: Duration = Duration::from_secs(10);

/// What `ensure_keypair` had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypairStatus {
    Existing,
    /// Private key present, public half (re)derived
    DerivedPublic,
    Generated,
}

pub struct KeyManager {
    wg_dir: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl KeyManager {
    pub fn new(wg_dir: impl Into<PathBuf>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            wg_dir: wg_dir.into(),
            executor,
        }
    }

    pub fn private_key_path(&self, plane: &str) -> PathBuf {
        self.wg_dir.join(format!("{}.key", plane))
    }

    pub fn public_key_path(&self, plane: &str) -> PathBuf {
        self.wg_dir.join(format!("{}.pub", plane))
    }

    /// Make sure both halves of the plane keypair exist.
    ///
    /// An existing private key is never replaced.
    pub async fn ensure_keypair(&self, plane: &str) -> DarksiteResult<KeypairStatus> {
        validate_plane_id(plane)?;
        let private_path = self.private_key_path(plane);
        let public_path = self.public_key_path(plane);

        tokio::fs::create_dir_all(&self.wg_dir)
            .await
            .map_err(|e| DarksiteError::file("create", &self.wg_dir, e))?;

        let existing_private = read_optional_text(&private_path, "private key")
            .await?
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());

        let (private, generated) = match existing_private {
            Some(private) => (private, false),
            None => {
                let output = run_checked(
                    self.executor.as_ref(),
                    &CommandSpec::new("wg").arg("genkey").timeout(WG_TIMEOUT),
                )
                .await?;
                let private = output.stdout_text();
                validate_wg_key(&private)?;
                write_key(&private_path, &private)?;
                info!(plane = %plane, "Generated private key {}", private_path.display());
                (private, true)
            }
        };

        if !generated && self.read_public_key(plane).await?.is_some() {
            return Ok(KeypairStatus::Existing);
        }

        let output = run_checked(
            self.executor.as_ref(),
            &CommandSpec::new("wg")
                .arg("pubkey")
                .stdin(format!("{}\n", private))
                .timeout(WG_TIMEOUT),
        )
        .await?;
        let public = output.stdout_text();
        validate_wg_key(&public)?;
        write_key(&public_path, &public)?;
        info!(plane = %plane, "Wrote public key {}", public_path.display());

        Ok(if generated {
            KeypairStatus::Generated
        } else {
            KeypairStatus::DerivedPublic
        })
    }

    /// Trimmed local public key; `None` when absent or malformed
    pub async fn read_public_key(&self, plane: &str) -> DarksiteResult<Option<String>> {
        let path = self.public_key_path(plane);
        let Some(text) = read_optional_text(&path, "public key").await? else {
            return Ok(None);
        };
        let key = text.trim();
        if key.is_empty() {
            return Ok(None);
        }
        match validate_wg_key(key) {
            Ok(()) => Ok(Some(key.to_string())),
            Err(e) => {
                warn!("ignoring {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}

fn write_key(path: &Path, key: &str) -> DarksiteResult<()> {
    write_atomic(path, format!("{}\n", key).as_bytes(), 0o600)
}
