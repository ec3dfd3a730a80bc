//! SSH trust bootstrap (hub only)
//!
//! Creates the automation account and its ed25519 identity on the hub, then
//! pushes the public key into `authorized_keys` on every node through the
//! command mesh.

use crate::common::{read_optional_text, set_owner, shell_quote, write_atomic};
use crate::config::SshConfig;
use crate::error::{DarksiteError, DarksiteResult};
use crate::exec::{run_best_effort, run_checked, CommandExecutor, CommandSpec};
use crate::mesh::{MeshCall, MeshClient};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const ACCOUNT_TIMEOUT: Duration = Duration::from_secs(30);
const DISTRIBUTE_RETRIES: u32 = 1;

/// A single-line OpenSSH public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshPublicKey {
    pub algorithm: String,
    pub blob: String,
    pub comment: Option<String>,
}

impl SshPublicKey {
    /// Parse `<algorithm> <base64 blob> [comment]`.
    ///
    /// The blob must decode and name the same algorithm it is labelled with.
    pub fn parse(line: &str) -> DarksiteResult<Self> {
        let invalid = |reason: &str| DarksiteError::InvalidKey {
            kind: "ssh".to_string(),
            reason: reason.to_string(),
        };

        let line = line.trim();
        if line.is_empty() {
            return Err(invalid("public key is empty"));
        }
        if line.contains('\n') {
            return Err(invalid("public key spans multiple lines"));
        }

        let mut parts = line.split_whitespace();
        let algorithm = parts.next().ok_or_else(|| invalid("missing algorithm"))?;
        let blob = parts.next().ok_or_else(|| invalid("missing key data"))?;
        let comment = parts.collect::<Vec<_>>().join(" ");

        let decoded = STANDARD
            .decode(blob)
            .map_err(|_| invalid("key data is not base64"))?;
        if decoded.len() < 4 {
            return Err(invalid("key data too short"));
        }
        let name_len = u32::from_be_bytes([decoded[0], decoded[1], decoded[2], decoded[3]]) as usize;
        let embedded = 4usize
            .checked_add(name_len)
            .and_then(|end| decoded.get(4..end))
            .ok_or_else(|| invalid("key data truncated"))?;
        if embedded != algorithm.as_bytes() {
            return Err(invalid("algorithm does not match key data"));
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            blob: blob.to_string(),
            comment: (!comment.is_empty()).then_some(comment),
        })
    }
}

impl fmt::Display for SshPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm, self.blob)?;
        if let Some(comment) = &self.comment {
            write!(f, " {}", comment)?;
        }
        Ok(())
    }
}

pub struct TrustBootstrap {
    config: SshConfig,
    mesh: Arc<MeshClient>,
    executor: Arc<dyn CommandExecutor>,
}

impl TrustBootstrap {
    pub fn new(config: SshConfig, mesh: Arc<MeshClient>, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            config,
            mesh,
            executor,
        }
    }

    fn sudoers_path(&self) -> PathBuf {
        self.config.sudoers_dir.join(&self.config.service_user)
    }

    /// Idempotently create the automation account, its sudo grant, its SSH
    /// directory and keypair, and return the public key
    pub async fn ensure_service_account(&self) -> DarksiteResult<SshPublicKey> {
        let user = self.config.service_user.as_str();
        info!(user = %user, "Ensuring service account and key");
        let executor = self.executor.as_ref();

        let exists = executor
            .execute(&CommandSpec::new("id").args(["-u", user]).timeout(ACCOUNT_TIMEOUT))
            .await
            .map(|output| output.success())
            .unwrap_or(false);
        if !exists {
            run_checked(
                executor,
                &CommandSpec::new("useradd")
                    .args(["-m", "-s", "/bin/bash", user])
                    .timeout(ACCOUNT_TIMEOUT),
            )
            .await?;
            info!(user = %user, "Created service account");
        }

        let sudoers = self.sudoers_path();
        if !sudoers.exists() {
            write_atomic(
                &sudoers,
                format!("{} ALL=(ALL) NOPASSWD:ALL\n", user).as_bytes(),
                0o440,
            )?;
            info!("Installed sudo grant {}", sudoers.display());
        }

        let ssh_dir = self.config.ssh_dir();
        run_checked(
            executor,
            &CommandSpec::new("install")
                .args(["-d", "-m0700", "-o", user, "-g", user])
                .path_arg(&ssh_dir)
                .timeout(ACCOUNT_TIMEOUT),
        )
        .await?;

        let private = self.config.private_key();
        let public = self.config.public_key();
        if !private.exists() {
            // ssh-keygen prompts before overwriting, so clear a stale public half first
            if public.exists() {
                tokio::fs::remove_file(&public)
                    .await
                    .map_err(|e| DarksiteError::file("remove stale key", &public, e))?;
            }
            run_checked(
                executor,
                &CommandSpec::new("ssh-keygen")
                    .args(["-q", "-t", "ed25519", "-N", "", "-C"])
                    .arg(format!("{}@darksite", user))
                    .arg("-f")
                    .path_arg(&private)
                    .timeout(ACCOUNT_TIMEOUT)
                    .as_user(user),
            )
            .await?;
            info!("Generated {}", private.display());
        } else if read_optional_text(&public, "ssh public key")
            .await?
            .map_or(true, |text| text.trim().is_empty())
        {
            let output = run_checked(
                executor,
                &CommandSpec::new("ssh-keygen")
                    .arg("-y")
                    .arg("-f")
                    .path_arg(&private)
                    .timeout(ACCOUNT_TIMEOUT)
                    .as_user(user),
            )
            .await?;
            write_atomic(&public, format!("{}\n", output.stdout_text()).as_bytes(), 0o644)?;
            if let Err(e) = set_owner(&public, user) {
                warn!("could not hand {} to {}: {}", public.display(), user, e);
            }
            info!("Re-derived {}", public.display());
        }

        let text = read_optional_text(&public, "ssh public key")
            .await?
            .unwrap_or_default();
        SshPublicKey::parse(&text)
    }

    /// The idempotent provisioning fragment run on every node
    pub fn provisioning_script(&self, key: &SshPublicKey) -> String {
        let user = shell_quote(&self.config.service_user);
        let ssh_dir = shell_quote(&self.config.ssh_dir().to_string_lossy());
        let authorized = shell_quote(&self.config.ssh_dir().join("authorized_keys").to_string_lossy());
        let line = shell_quote(&key.to_string());

        [
            "set -e".to_string(),
            format!(
                "id -u {user} >/dev/null 2>&1 || useradd -m -s /bin/bash {user}",
                user = user
            ),
            format!(
                "install -d -m0700 -o {user} -g {user} {dir}",
                user = user,
                dir = ssh_dir
            ),
            format!("touch {}", authorized),
            format!(
                "grep -qxF {line} {file} || printf '%s\\n' {line} >> {file}",
                line = line,
                file = authorized
            ),
            format!("chown {user}:{user} {file}", user = user, file = authorized),
            format!("chmod 0600 {}", authorized),
        ]
        .join("\n")
    }

    /// Push `key` to every node; returns how many nodes answered
    pub async fn distribute_key(&self, key: &SshPublicKey) -> usize {
        info!("Distributing service key via the command mesh");
        let call = MeshCall::cmd_run(self.provisioning_script(key));
        let response = self
            .mesh
            .broadcast_exec(&self.mesh.config().target, &call, DISTRIBUTE_RETRIES)
            .await;
        info!(nodes = response.len(), "Service key distributed");
        response.len()
    }

    /// Make the controller artifact directories writable by the service group.
    ///
    /// Every step is best-effort; returns whether all of them succeeded.
    pub async fn prepare_artifact_dirs(&self) -> bool {
        let user = self.config.service_user.as_str();
        let executor = self.executor.as_ref();
        let mut ok = true;

        for dir in &self.config.artifact_dirs {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!("could not create {}: {}", dir.display(), e);
                ok = false;
            }
        }

        let group_exists = executor
            .execute(&CommandSpec::new("getent").args(["group", user]).timeout(ACCOUNT_TIMEOUT))
            .await
            .map(|output| output.success())
            .unwrap_or(false);
        if !group_exists {
            ok &= run_best_effort(
                executor,
                &CommandSpec::new("groupadd").arg(user).timeout(ACCOUNT_TIMEOUT),
            )
            .await;
        }
        ok &= run_best_effort(
            executor,
            &CommandSpec::new("usermod")
                .args(["-aG", user, user])
                .timeout(ACCOUNT_TIMEOUT),
        )
        .await;

        let dirs: Vec<String> = self
            .config
            .artifact_dirs
            .iter()
            .filter(|dir| dir.exists())
            .map(|dir| dir.to_string_lossy().into_owned())
            .collect();
        if !dirs.is_empty() {
            ok &= run_best_effort(
                executor,
                &CommandSpec::new("chgrp")
                    .args(["-R", user])
                    .args(dirs.iter().cloned())
                    .timeout(ACCOUNT_TIMEOUT),
            )
            .await;
            ok &= run_best_effort(
                executor,
                &CommandSpec::new("chmod")
                    .args(["-R", "g+rwX"])
                    .args(dirs)
                    .timeout(ACCOUNT_TIMEOUT),
            )
            .await;
        }

        debug!(ok, "Artifact directories prepared");
        ok
    }
}
