//! Local identity: which seed node this machine is, and whether it is the hub

use crate::error::{DarksiteError, DarksiteResult};
use crate::exec::{CommandExecutor, CommandSpec};
use crate::seed::Seed;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Hub,
    Spoke,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Hub => f.write_str("hub"),
            Role::Spoke => f.write_str("spoke"),
        }
    }
}

/// Hostnames reported by the local machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHostnames {
    pub fqdn: String,
    pub short: String,
}

impl LocalHostnames {
    /// Derive both forms from a single name (`node1.local` -> `node1`)
    pub fn from_name(name: &str) -> Self {
        let fqdn = name.trim().to_string();
        let short = fqdn.split('.').next().unwrap_or_default().to_string();
        Self { fqdn, short }
    }

    /// Ask the OS via `hostname -f` and `hostname -s`
    pub async fn detect(executor: &dyn CommandExecutor) -> DarksiteResult<Self> {
        let fqdn = query_hostname(executor, "-f").await;
        let short = query_hostname(executor, "-s").await;

        let (fqdn, short) = match (fqdn, short) {
            (Some(fqdn), Some(short)) => (fqdn, short),
            (Some(fqdn), None) => return Ok(Self::from_name(&fqdn)),
            (None, Some(short)) => (short.clone(), short),
            (None, None) => {
                return Err(DarksiteError::IdentityUnresolved {
                    hostname: "<unknown>".to_string(),
                })
            }
        };
        debug!(fqdn = %fqdn, short = %short, "Detected local hostnames");
        Ok(Self { fqdn, short })
    }
}

async fn query_hostname(executor: &dyn CommandExecutor, flag: &str) -> Option<String> {
    let spec = CommandSpec::new("hostname")
        .arg(flag)
        .timeout(Duration::from_secs(5));
    match executor.execute(&spec).await {
        Ok(output) if output.success() => {
            let name = output.stdout_text();
            (!name.is_empty()).then_some(name)
        }
        Ok(output) => {
            debug!("hostname {} exited with {:?}", flag, output.exit_code);
            None
        }
        Err(e) => {
            debug!("hostname {} failed: {}", flag, e);
            None
        }
    }
}

/// Find the canonical seed node name for this machine.
///
/// Full hostname first (case-insensitive), then a node whose name is the
/// short hostname or starts with `<short>.`.
pub fn resolve(seed: &Seed, hostnames: &LocalHostnames) -> DarksiteResult<String> {
    if let Some((name, _)) = seed.node(&hostnames.fqdn) {
        return Ok(name.to_string());
    }

    let short = hostnames.short.to_ascii_lowercase();
    if !short.is_empty() {
        let dotted = format!("{}.", short);
        let matched = seed.nodes.keys().find(|name| {
            let lower = name.to_ascii_lowercase();
            lower == short || lower.starts_with(&dotted)
        });
        if let Some(name) = matched {
            return Ok(name.clone());
        }
    }

    Err(DarksiteError::IdentityUnresolved {
        hostname: hostnames.fqdn.clone(),
    })
}

/// Who this node is within the seed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Canonical seed node name
    pub node: String,
    /// Canonical seed name of the hub
    pub hub: String,
    pub role: Role,
}

impl Identity {
    pub fn resolve(seed: &Seed, hostnames: &LocalHostnames, hub_prefix: &str) -> DarksiteResult<Self> {
        let node = resolve(seed, hostnames)?;
        let hub = seed.hub_name(hub_prefix)?.to_string();
        let role = if node.eq_ignore_ascii_case(&hub) {
            Role::Hub
        } else {
            Role::Spoke
        };
        info!(node = %node, hub = %hub, role = %role, "Resolved local identity");
        Ok(Self { node, hub, role })
    }

    pub fn is_hub(&self) -> bool {
        self.role == Role::Hub
    }
}
