//! Hub-and-spoke peer rendering for each plane
//!
//! The hub peers with every node that has published a key; spokes peer only
//! with the hub and route the whole plane CIDR through it. Rendering is
//! deterministic, so an unchanged fleet rewrites nothing and restarts nothing.

use super::backup;
use super::config_file::{compose, endpoint, interface_section, is_published_key, PeerStanza};
use super::keys::KeyManager;
use crate::common::{read_optional_text, write_atomic};
use crate::config::vpn::validate_plane_id;
use crate::config::VpnConfig;
use crate::error::{DarksiteError, DarksiteResult};
use crate::exec::{run_checked, CommandExecutor, CommandSpec};
use crate::identity::{Identity, Role};
use crate::mesh::{text_answers, MeshCall, MeshClient};
use crate::seed::Seed;
use ipnet::IpNet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const RESTART_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of rendering one plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutcome {
    pub plane: String,
    pub path: PathBuf,
    pub changed: bool,
    pub peers: usize,
}

pub struct TopologyRenderer {
    config: VpnConfig,
    mesh: Arc<MeshClient>,
    keys: KeyManager,
    executor: Arc<dyn CommandExecutor>,
}

impl TopologyRenderer {
    pub fn new(config: VpnConfig, mesh: Arc<MeshClient>, executor: Arc<dyn CommandExecutor>) -> Self {
        let keys = KeyManager::new(config.wg_dir.clone(), executor.clone());
        Self {
            config,
            mesh,
            keys,
            executor,
        }
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn conf_path(&self, plane: &str) -> PathBuf {
        self.config.wg_dir.join(format!("{}.conf", plane))
    }

    /// Regenerate the peer section of `<plane>.conf`, writing only on change
    pub async fn render(
        &self,
        plane: &str,
        seed: &Seed,
        identity: &Identity,
    ) -> DarksiteResult<RenderOutcome> {
        validate_plane_id(plane)?;
        let path = self.conf_path(plane);
        let existing = read_optional_text(&path, "plane config")
            .await?
            .ok_or_else(|| DarksiteError::MissingBaseConfig { path: path.clone() })?;

        let (_, me) = seed
            .node(&identity.node)
            .ok_or_else(|| DarksiteError::IdentityUnresolved {
                hostname: identity.node.clone(),
            })?;
        let my_ip = me
            .plane_ip(plane)
            .ok_or_else(|| DarksiteError::MissingPlaneIp {
                node: identity.node.clone(),
                plane: plane.to_string(),
            })?;

        let peers = match identity.role {
            Role::Hub => self.hub_peers(plane, seed, identity, my_ip).await?,
            Role::Spoke => vec![self.spoke_peer(plane, seed, identity).await?],
        };

        let desired = compose(interface_section(&existing), &peers);
        if desired == existing {
            debug!(plane = %plane, "config unchanged");
            return Ok(RenderOutcome {
                plane: plane.to_string(),
                path,
                changed: false,
                peers: peers.len(),
            });
        }

        backup::rotate(&path, self.config.backup_keep).await?;
        write_atomic(&path, desired.as_bytes(), 0o600)?;
        info!(plane = %plane, peers = peers.len(), "Rewrote {}", path.display());

        Ok(RenderOutcome {
            plane: plane.to_string(),
            path,
            changed: true,
            peers: peers.len(),
        })
    }

    /// One stanza per other node with a plane address and a published key
    async fn hub_peers(
        &self,
        plane: &str,
        seed: &Seed,
        identity: &Identity,
        my_ip: IpAddr,
    ) -> DarksiteResult<Vec<PeerStanza>> {
        let remote_pub = self.config.wg_dir.join(format!("{}.pub", plane));
        let mesh_config = self.mesh.config();
        let response = self
            .mesh
            .broadcast_exec(
                &mesh_config.target,
                &MeshCall::file_read(&remote_pub),
                mesh_config.call_retries,
            )
            .await;

        let mut keys = text_answers(&response);
        if let Some(local) = self.keys.read_public_key(plane).await? {
            keys.insert(identity.node.to_ascii_lowercase(), local);
        }

        let mut peers = Vec::new();
        for (name, node) in &seed.nodes {
            if name.eq_ignore_ascii_case(&identity.node) {
                continue;
            }
            let Some(ip) = node.plane_ip(plane) else {
                debug!(plane = %plane, node = %name, "no plane address, skipping");
                continue;
            };
            if ip == my_ip {
                continue;
            }
            match keys.get(&name.to_ascii_lowercase()) {
                Some(key) if is_published_key(key) => peers.push(PeerStanza {
                    name: name.clone(),
                    plane: plane.to_string(),
                    public_key: key.clone(),
                    allowed_ips: IpNet::from(ip),
                    endpoint: None,
                    keepalive: self.config.keepalive,
                }),
                Some(_) => debug!(plane = %plane, node = %name, "key read failed, omitting"),
                None => debug!(plane = %plane, node = %name, "no public key yet, omitting"),
            }
        }
        Ok(peers)
    }

    /// The single stanza pointing a spoke at the hub
    async fn spoke_peer(
        &self,
        plane: &str,
        seed: &Seed,
        identity: &Identity,
    ) -> DarksiteResult<PeerStanza> {
        let (hub_name, hub) = seed.node(&identity.hub).ok_or_else(|| DarksiteError::MissingHub {
            reason: format!("hub '{}' is not one of the seed nodes", identity.hub),
        })?;
        let spec = seed.plane(plane)?;
        let host = hub
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .ok_or_else(|| DarksiteError::MissingEndpoint {
                node: hub_name.to_string(),
            })?;

        let remote_pub = self.config.wg_dir.join(format!("{}.pub", plane));
        let response = self
            .mesh
            .broadcast_exec(
                hub_name,
                &MeshCall::file_read(&remote_pub),
                self.mesh.config().call_retries,
            )
            .await;
        let answers = text_answers(&response);
        let key = answers
            .get(&hub_name.to_ascii_lowercase())
            .filter(|key| is_published_key(key))
            .or_else(|| answers.values().find(|key| is_published_key(key)))
            .cloned()
            .ok_or_else(|| DarksiteError::HubKeyUnavailable {
                plane: plane.to_string(),
            })?;

        Ok(PeerStanza {
            name: hub_name.to_string(),
            plane: plane.to_string(),
            public_key: key,
            allowed_ips: spec.cidr,
            endpoint: Some(endpoint(host, spec.port)),
            keepalive: self.config.keepalive,
        })
    }

    /// Restart the plane's tunnel unit; failure is only a warning
    pub async fn restart_plane(&self, plane: &str) -> bool {
        let unit = self.config.unit_for(plane);
        let spec = CommandSpec::new("systemctl")
            .args(["restart", unit.as_str()])
            .timeout(RESTART_TIMEOUT);
        match run_checked(self.executor.as_ref(), &spec).await {
            Ok(_) => {
                info!(plane = %plane, "Restarted {}", unit);
                true
            }
            Err(e) => {
                warn!(plane = %plane, "restart of {} failed: {}", unit, e);
                false
            }
        }
    }
}
