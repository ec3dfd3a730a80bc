use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use darksite_core::{
    config::DarksiteConfig,
    error::{DarksiteError, DarksiteResult},
    exec::CommandExecutor,
    gate::{GateReport, Prober, ReachabilityGate, SystemProber},
    identity::{Identity, LocalHostnames},
    inventory::{self, InventoryTarget},
    known_hosts::{KnownHostsReport, KnownHostsSeeder},
    mesh::{MeshClient, ReadinessPolicy},
    playbook::PlaybookRunner,
    seed::Seed,
    trust::TrustBootstrap,
    vpn::{KeypairStatus, RenderOutcome, TopologyRenderer},
};
use ipnet::IpNet;

/// What the hub-only phase accomplished
#[derive(Debug, Clone, Default)]
pub struct HubReport {
    /// Minions that confirmed the service account key install
    pub key_installed_on: usize,
    pub artifact_dirs_ready: bool,
    pub gate: GateReport,
}

/// Summary of one `apply` run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub seed_path: PathBuf,
    pub identity: Identity,
    pub responders: usize,
    pub planes: Vec<RenderOutcome>,
    /// Planes whose tunnel restart succeeded
    pub restarted: Vec<String>,
    pub known_hosts: Option<KnownHostsReport>,
    pub hub: Option<HubReport>,
    /// Hub-phase failure swallowed outside strict mode
    pub hub_error: Option<String>,
    pub facts_refreshed: bool,
}

/// Read-only view of the seed from this node's perspective
#[derive(Debug, Clone)]
pub struct SeedSummary {
    pub path: PathBuf,
    pub identity: Identity,
    pub nodes: usize,
    pub planes: Vec<PlaneSummary>,
}

#[derive(Debug, Clone)]
pub struct PlaneSummary {
    pub plane: String,
    pub cidr: IpNet,
    pub port: u16,
    pub address: Option<IpAddr>,
}

impl fmt::Display for SeedSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "seed:  {}", self.path.display())?;
        writeln!(f, "nodes: {}", self.nodes)?;
        writeln!(f, "node:  {}", self.identity.node)?;
        writeln!(f, "hub:   {}", self.identity.hub)?;
        writeln!(f, "role:  {}", self.identity.role)?;
        for plane in &self.planes {
            let address = plane
                .address
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "plane {}: cidr={} port={} address={}",
                plane.plane, plane.cidr, plane.port, address
            )?;
        }
        Ok(())
    }
}

/// Drives the ordered convergence phases for this node
///
/// Every external tool goes through the shared [`CommandExecutor`], so the
/// whole run can be scripted in tests. Phases are strictly sequential.
pub struct Orchestrator {
    config: DarksiteConfig,
    executor: Arc<dyn CommandExecutor>,
    mesh: Arc<MeshClient>,
    prober: Arc<dyn Prober>,
    hostname: Option<String>,
}

impl Orchestrator {
    pub fn new(config: DarksiteConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        let mesh = Arc::new(MeshClient::new(config.mesh.clone(), executor.clone()));
        let prober = Arc::new(SystemProber::new(executor.clone(), config.gate.probe_timeout));
        Self {
            config,
            executor,
            mesh,
            prober,
            hostname: None,
        }
    }

    /// Replace the network probes used by the reachability gate
    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    /// Use a fixed hostname instead of asking the OS
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn config(&self) -> &DarksiteConfig {
        &self.config
    }

    async fn hostnames(&self) -> DarksiteResult<LocalHostnames> {
        match &self.hostname {
            Some(name) => Ok(LocalHostnames::from_name(name)),
            None => LocalHostnames::detect(self.executor.as_ref()).await,
        }
    }

    async fn identify(&self, seed: &Seed) -> DarksiteResult<Identity> {
        let hostnames = self.hostnames().await?;
        Identity::resolve(seed, &hostnames, &self.config.vpn.hub_prefix)
    }

    /// Configured plane subset, otherwise every plane in the seed
    fn planes(&self, seed: &Seed) -> DarksiteResult<Vec<String>> {
        let planes = match &self.config.vpn.planes {
            Some(planes) => planes.clone(),
            None => seed.plane_ids(),
        };
        for plane in &planes {
            seed.plane(plane)?;
        }
        Ok(planes)
    }

    fn renderer(&self) -> TopologyRenderer {
        TopologyRenderer::new(
            self.config.vpn.clone(),
            self.mesh.clone(),
            self.executor.clone(),
        )
    }

    fn playbooks(&self) -> PlaybookRunner {
        PlaybookRunner::new(
            self.config.playbook.clone(),
            self.config.ssh.clone(),
            self.executor.clone(),
        )
    }

    async fn pause(&self, what: &str, duration: Duration) {
        if !duration.is_zero() {
            tracing::info!("Pausing {:?} ({})", duration, what);
            tokio::time::sleep(duration).await;
        }
    }

    async fn ensure_keys(&self, renderer: &TopologyRenderer, planes: &[String]) -> DarksiteResult<()> {
        for plane in planes {
            let status = renderer.keys().ensure_keypair(plane).await?;
            if status != KeypairStatus::Existing {
                tracing::info!(plane = %plane, status = ?status, "Plane keypair ready");
            }
        }
        Ok(())
    }

    /// Render every plane and restart the ones whose config changed
    async fn converge_planes(
        &self,
        renderer: &TopologyRenderer,
        planes: &[String],
        seed: &Seed,
        identity: &Identity,
    ) -> DarksiteResult<(Vec<RenderOutcome>, Vec<String>)> {
        let mut outcomes = Vec::with_capacity(planes.len());
        let mut restarted = Vec::new();
        for plane in planes {
            let outcome = renderer.render(plane, seed, identity).await?;
            if outcome.changed {
                if renderer.restart_plane(plane).await {
                    restarted.push(plane.clone());
                }
            } else {
                tracing::info!(plane = %plane, "Plane unchanged, no restart");
            }
            outcomes.push(outcome);
        }
        Ok((outcomes, restarted))
    }

    async fn inventory_targets(&self) -> Vec<InventoryTarget> {
        let path = self.config.playbook.inventory_path();
        match inventory::load(&path).await {
            Ok(targets) => targets,
            Err(e) => {
                tracing::warn!("Could not read inventory {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    async fn seed_known_hosts(&self, identity: &Identity, targets: &[InventoryTarget]) -> Option<KnownHostsReport> {
        if targets.is_empty() && !identity.is_hub() {
            tracing::warn!("No inventory on this node; skipping known_hosts seeding");
            return None;
        }
        let seeder = KnownHostsSeeder::new(self.config.ssh.clone(), self.executor.clone());
        match seeder.seed(targets).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!("known_hosts seeding failed: {}", e);
                None
            }
        }
    }

    /// Trust bootstrap, reachability gate and the playbook run
    async fn hub_phase(&self, targets: &[InventoryTarget]) -> DarksiteResult<HubReport> {
        let trust = TrustBootstrap::new(
            self.config.ssh.clone(),
            self.mesh.clone(),
            self.executor.clone(),
        );
        let key = trust.ensure_service_account().await?;
        let key_installed_on = trust.distribute_key(&key).await;
        let artifact_dirs_ready = trust.prepare_artifact_dirs().await;

        let gate = ReachabilityGate::new(self.config.gate.clone(), self.prober.clone());
        let gate = gate.wait(&inventory::remote_addresses(targets)).await;

        self.playbooks().run().await?;

        Ok(HubReport {
            key_installed_on,
            artifact_dirs_ready,
            gate,
        })
    }

    /// The full convergence run
    pub async fn apply(&self) -> DarksiteResult<RunReport> {
        tracing::info!("Starting darksite convergence");
        self.pause("post-boot", self.config.post_boot_pause).await;

        let (seed_path, seed) = Seed::load(&self.config.seed_paths).await?;
        let identity = self.identify(&seed).await?;

        let playbooks = self.playbooks();
        if identity.is_hub() {
            playbooks.verify_artifacts().await?;
        }

        let planes = self.planes(&seed)?;
        let renderer = self.renderer();
        self.ensure_keys(&renderer, &planes).await?;

        let responders = self
            .mesh
            .wait_until_ready(ReadinessPolicy::from_config(&self.config.mesh))
            .await?;

        let (outcomes, restarted) = self
            .converge_planes(&renderer, &planes, &seed, &identity)
            .await?;
        if !restarted.is_empty() {
            self.pause("plane settle", self.config.vpn.settle).await;
        }

        let targets = self.inventory_targets().await;
        let known_hosts = self.seed_known_hosts(&identity, &targets).await;

        let mut hub = None;
        let mut hub_error = None;
        if identity.is_hub() {
            match self.hub_phase(&targets).await {
                Ok(report) => hub = Some(report),
                Err(e) if self.config.strict => return Err(e),
                Err(e) => {
                    tracing::error!("Hub phase failed (continuing, strict mode off): {}", e);
                    hub_error = Some(e.to_string());
                }
            }
        }

        let facts_refreshed = self.mesh.refresh_facts().await;

        tracing::info!(
            node = %identity.node,
            role = %identity.role,
            planes = outcomes.len(),
            restarted = restarted.len(),
            "Convergence finished"
        );
        Ok(RunReport {
            seed_path,
            identity,
            responders,
            planes: outcomes,
            restarted,
            known_hosts,
            hub,
            hub_error,
            facts_refreshed,
        })
    }

    /// Ensure keys, render and restart changed planes; no readiness wait, no hub phase
    pub async fn refresh_planes(&self, only: &[String]) -> DarksiteResult<Vec<RenderOutcome>> {
        let (_, seed) = Seed::load(&self.config.seed_paths).await?;
        let identity = self.identify(&seed).await?;

        let planes = if only.is_empty() {
            self.planes(&seed)?
        } else {
            for plane in only {
                seed.plane(plane)?;
            }
            only.to_vec()
        };

        let renderer = self.renderer();
        self.ensure_keys(&renderer, &planes).await?;
        let (outcomes, restarted) = self
            .converge_planes(&renderer, &planes, &seed, &identity)
            .await?;
        tracing::info!(
            planes = outcomes.len(),
            restarted = restarted.len(),
            "Plane refresh finished"
        );
        Ok(outcomes)
    }

    /// Load and validate the seed and resolve this node, without side effects
    pub async fn check_seed(&self, seed_path: Option<PathBuf>) -> DarksiteResult<SeedSummary> {
        let (path, seed) = match seed_path {
            Some(path) => {
                let seed = Seed::load_file(&path).await?;
                (path, seed)
            }
            None => Seed::load(&self.config.seed_paths).await?,
        };
        let identity = self.identify(&seed).await?;

        let (_, me) = seed
            .node(&identity.node)
            .ok_or_else(|| DarksiteError::IdentityUnresolved {
                hostname: identity.node.clone(),
            })?;
        let planes = seed
            .planes
            .iter()
            .map(|(plane, spec)| PlaneSummary {
                plane: plane.clone(),
                cidr: spec.cidr,
                port: spec.port,
                address: me.plane_ip(plane),
            })
            .collect();

        Ok(SeedSummary {
            path,
            identity,
            nodes: seed.nodes.len(),
            planes,
        })
    }

    /// Parsed configuration engine inventory
    pub async fn inventory(&self) -> DarksiteResult<Vec<InventoryTarget>> {
        inventory::load(&self.config.playbook.inventory_path()).await
    }
}
