//! Reachability gate
//!
//! Bridges "overlay just reconfigured" to "remote shell available": pending
//! management addresses are polled until each accepts a TCP connection on the
//! administrative port, or the time budget runs out. Running out is not an
//! error; the caller gets a [`GateReport`] and carries on.

use crate::config::GateConfig;
use crate::exec::{CommandExecutor, CommandSpec};
use crate::inventory::is_local_address;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How many pending hosts a progress line names before summarising
const PROGRESS_HOSTS_SHOWN: usize = 6;

/// Network probes used by the gate
#[async_trait]
pub trait Prober: Send + Sync {
    /// Best-effort nudge (a single ping) so tunnels complete their handshake
    async fn kick(&self, address: &str);

    /// Whether the kernel has a route to `address`
    async fn route_ok(&self, address: &str) -> Result<(), String>;

    async fn connect(&self, address: &str, port: u16, timeout: Duration) -> Result<(), String>;
}

/// Probes backed by `ping`, `ip route get` and a real TCP connect
pub struct SystemProber {
    executor: Arc<dyn CommandExecutor>,
    probe_timeout: Duration,
}

impl SystemProber {
    pub fn new(executor: Arc<dyn CommandExecutor>, probe_timeout: Duration) -> Self {
        Self {
            executor,
            probe_timeout,
        }
    }
}

#[async_trait]
impl Prober for SystemProber {
    async fn kick(&self, address: &str) {
        let spec = CommandSpec::new("ping")
            .args(["-c1", "-W1", address])
            .timeout(self.probe_timeout);
        if let Err(e) = self.executor.execute(&spec).await {
            debug!(address = %address, "ping failed: {}", e);
        }
    }

    async fn route_ok(&self, address: &str) -> Result<(), String> {
        let spec = CommandSpec::new("ip")
            .args(["route", "get", address])
            .timeout(self.probe_timeout);
        match self.executor.execute(&spec).await {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(format!("no route: {}", output.combined_text())),
            Err(e) => Err(format!("route lookup failed: {}", e)),
        }
    }

    async fn connect(&self, address: &str, port: u16, timeout: Duration) -> Result<(), String> {
        match tokio::time::timeout(timeout, TcpStream::connect((address, port))).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("connect timed out after {:?}", timeout)),
        }
    }
}

/// Outcome of one gate run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateReport {
    /// Addresses that accepted a connection, in the order they did
    pub reached: Vec<String>,
    /// Addresses still pending, with the last error seen for each
    pub pending: BTreeMap<String, String>,
    pub timed_out: bool,
}

impl GateReport {
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

/// `a, b, c (+2 more)` style summary of pending hosts
pub fn summarize_pending(pending: &[String]) -> String {
    let shown = pending
        .iter()
        .take(PROGRESS_HOSTS_SHOWN)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if pending.len() > PROGRESS_HOSTS_SHOWN {
        format!("{} (+{} more)", shown, pending.len() - PROGRESS_HOSTS_SHOWN)
    } else {
        shown
    }
}

pub struct ReachabilityGate {
    config: GateConfig,
    prober: Arc<dyn Prober>,
}

impl ReachabilityGate {
    pub fn new(config: GateConfig, prober: Arc<dyn Prober>) -> Self {
        Self { config, prober }
    }

    /// Poll until every non-loopback address is reachable or the budget is spent
    pub async fn wait(&self, addresses: &[String]) -> GateReport {
        let mut seen = HashSet::new();
        let mut pending: Vec<String> = addresses
            .iter()
            .filter(|address| !is_local_address(address))
            .filter(|address| seen.insert(address.as_str()))
            .cloned()
            .collect();
        let mut last_error: BTreeMap<String, String> = pending
            .iter()
            .map(|address| (address.clone(), "not probed yet".to_string()))
            .collect();
        let mut reached = Vec::new();

        if pending.is_empty() {
            info!("No remote hosts to gate on");
            return GateReport::default();
        }

        info!(
            hosts = pending.len(),
            port = self.config.admin_port,
            timeout = ?self.config.timeout,
            "Waiting for hosts to become reachable"
        );

        let started = Instant::now();
        let mut last_progress = started;

        loop {
            for address in &pending {
                self.prober.kick(address).await;
            }

            let mut still_pending = Vec::with_capacity(pending.len());
            for address in pending {
                let probe = match self.prober.route_ok(&address).await {
                    Ok(()) => {
                        self.prober
                            .connect(&address, self.config.admin_port, self.config.connect_timeout)
                            .await
                    }
                    Err(e) => Err(e),
                };
                match probe {
                    Ok(()) => {
                        debug!(address = %address, "reachable");
                        last_error.remove(&address);
                        reached.push(address);
                    }
                    Err(e) => {
                        last_error.insert(address.clone(), e);
                        still_pending.push(address);
                    }
                }
            }
            pending = still_pending;

            if pending.is_empty() {
                info!(
                    hosts = reached.len(),
                    elapsed = ?started.elapsed(),
                    "All hosts reachable"
                );
                return GateReport {
                    reached,
                    pending: BTreeMap::new(),
                    timed_out: false,
                };
            }

            let elapsed = started.elapsed();
            if elapsed >= self.config.timeout {
                break;
            }

            if last_progress.elapsed() >= self.config.progress_interval {
                info!(
                    "Still waiting on {} host(s): {}",
                    pending.len(),
                    summarize_pending(&pending)
                );
                last_progress = Instant::now();
            }

            let remaining = self.config.timeout - elapsed;
            tokio::time::sleep(self.config.tick_interval.min(remaining)).await;
        }

        warn!(
            "Reachability gate timed out after {:?} with {} host(s) pending; continuing",
            self.config.timeout,
            pending.len()
        );
        for address in &pending {
            if let Some(error) = last_error.get(address) {
                warn!(address = %address, "last error: {}", error);
            }
        }

        GateReport {
            reached,
            pending: last_error,
            timed_out: true,
        }
    }
}
