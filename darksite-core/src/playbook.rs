//! Configuration engine runner
//!
//! A connectivity check (`ansible ... -m ping`) followed by the site playbook.
//! Output is streamed line by line as it arrives; both stages are bounded by
//! a timeout that kills the process and reports exit code 124.

use crate::config::{PlaybookConfig, SshConfig};
use crate::error::{DarksiteError, DarksiteResult};
use crate::exec::{io_to_error, CommandExecutor, CommandSpec};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub const STAGE_PING: &str = "ping";
pub const STAGE_SITE: &str = "site";

pub struct PlaybookRunner {
    config: PlaybookConfig,
    ssh: SshConfig,
    executor: Arc<dyn CommandExecutor>,
}

impl PlaybookRunner {
    pub fn new(config: PlaybookConfig, ssh: SshConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            config,
            ssh,
            executor,
        }
    }

    /// Curated environment handed to both engine invocations
    pub fn ansible_env(&self) -> Vec<(String, String)> {
        let ssh_args = format!(
            "-o UserKnownHostsFile={} -o StrictHostKeyChecking={} -o LogLevel=ERROR \
             -o ServerAliveInterval=15 -o ServerAliveCountMax=3",
            self.ssh.known_hosts.display(),
            self.ssh.host_key_policy.ssh_option()
        );
        let color = if self.config.color {
            ("ANSIBLE_FORCE_COLOR", "1")
        } else {
            ("ANSIBLE_NOCOLOR", "1")
        };

        [
            (
                "ANSIBLE_PRIVATE_KEY_FILE",
                self.ssh.private_key().display().to_string(),
            ),
            ("ANSIBLE_SSH_COMMON_ARGS", ssh_args),
            ("ANSIBLE_STDOUT_CALLBACK", "default".to_string()),
            ("ANSIBLE_LOAD_CALLBACK_PLUGINS", "1".to_string()),
            (color.0, color.1.to_string()),
            ("ANSIBLE_HOST_KEY_CHECKING", "False".to_string()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
    }

    /// Both the inventory and the site playbook must exist before anything runs
    pub async fn verify_artifacts(&self) -> DarksiteResult<()> {
        for (what, path) in [
            ("inventory", self.config.inventory_path()),
            ("site playbook", self.config.site_path()),
        ] {
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(DarksiteError::MissingArtifact {
                    what: what.to_string(),
                    path,
                });
            }
        }
        Ok(())
    }

    fn command(&self, program: &str, args: Vec<String>, timeout: Duration) -> CommandSpec {
        let mut spec = CommandSpec::new(program)
            .args(args)
            .current_dir(&self.config.base_dir)
            .timeout(timeout);
        for (key, value) in self.ansible_env() {
            spec = spec.env(key, value);
        }
        if self.config.run_as_service_user {
            spec = spec.as_user(&self.ssh.service_user);
        }
        spec
    }

    pub fn ping_command(&self) -> CommandSpec {
        let args = vec![
            "-v".to_string(),
            "-i".to_string(),
            self.config.inventory_path().display().to_string(),
            "all".to_string(),
            "-m".to_string(),
            "ping".to_string(),
        ];
        self.command("ansible", args, self.config.ping_timeout)
    }

    pub fn site_command(&self) -> CommandSpec {
        let mut args = Vec::new();
        if !self.config.verbosity.is_empty() {
            args.push(self.config.verbosity.clone());
        }
        args.push("-i".to_string());
        args.push(self.config.inventory_path().display().to_string());
        args.push(self.config.site_path().display().to_string());
        self.command("ansible-playbook", args, self.config.run_timeout)
    }

    async fn run_stage(&self, stage: &str, spec: CommandSpec) -> DarksiteResult<()> {
        info!(stage = %stage, command = %spec, "Running configuration engine");
        let mut sink = |line: &str| println!("{}", line);
        let outcome = self
            .executor
            .stream(&spec, &mut sink)
            .await
            .map_err(|e| io_to_error(&spec, e))?;

        if outcome.success() {
            info!(stage = %stage, "Configuration engine stage finished");
            return Ok(());
        }
        error!(stage = %stage, rc = outcome.code(), "Configuration engine stage failed");
        Err(DarksiteError::PlaybookFailed {
            stage: stage.to_string(),
            code: outcome.code(),
        })
    }

    /// Confirm every inventory host answers over the engine's own transport
    pub async fn check_connectivity(&self) -> DarksiteResult<()> {
        self.run_stage(STAGE_PING, self.ping_command()).await
    }

    pub async fn converge(&self) -> DarksiteResult<()> {
        self.run_stage(STAGE_SITE, self.site_command()).await
    }

    /// Connectivity check, then the site playbook
    pub async fn run(&self) -> DarksiteResult<()> {
        self.check_connectivity().await?;
        self.converge().await
    }
}
