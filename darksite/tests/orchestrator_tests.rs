// End-to-end convergence runs against a scripted command executor

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use darksite::{DarksiteError, Orchestrator};
use darksite_core::gate::Prober;
use darksite_core::identity::Role;
use darksite_core::test_helpers::{fake_wg_key, output_fail, output_ok, ScriptedExecutor};
use pretty_assertions::assert_eq;

mod common;
use common::TestNode;

/// Every host is reachable; records what was probed
#[derive(Default)]
struct OpenProber {
    connected: Mutex<BTreeSet<String>>,
}

#[async_trait]
impl Prober for OpenProber {
    async fn kick(&self, _address: &str) {}

    async fn route_ok(&self, _address: &str) -> Result<(), String> {
        Ok(())
    }

    async fn connect(&self, address: &str, _port: u16, _timeout: Duration) -> Result<(), String> {
        self.connected.lock().unwrap().insert(address.to_string());
        Ok(())
    }
}

fn mesh_ready(executor: &ScriptedExecutor) {
    executor.on(
        "test.ping",
        output_ok(r#"{"master.local": true, "node1.local": true}"#),
    );
}

fn wg_tools(executor: &ScriptedExecutor) {
    executor.on("wg genkey", output_ok(&fake_wg_key(1)));
    executor.on("wg pubkey", output_ok(&fake_wg_key(2)));
}

fn spoke() -> (TestNode, Arc<ScriptedExecutor>) {
    let node = TestNode::new("10.78.0.2", "10.79.0.2");
    let executor = Arc::new(ScriptedExecutor::new());
    wg_tools(&executor);
    mesh_ready(&executor);
    executor.on(
        "salt master.local file.read",
        output_ok(&format!(
            "Minion did not return. [No response]\n{{\"master.local\": \"{}\"}}",
            fake_wg_key(42)
        )),
    );
    (node, executor)
}

fn hub() -> (TestNode, Arc<ScriptedExecutor>) {
    let node = TestNode::new("10.78.0.1", "10.79.0.1");
    node.install_playbooks();
    node.install_service_key();
    let executor = Arc::new(ScriptedExecutor::new());
    wg_tools(&executor);
    mesh_ready(&executor);
    executor.on(
        "file.read",
        output_ok(&format!(
            "{{\"master.local\": \"{}\", \"node1.local\": \"{}\"}}",
            fake_wg_key(42),
            fake_wg_key(7)
        )),
    );
    executor.on(
        "cmd.run",
        output_ok(r#"{"master.local": "", "node1.local": ""}"#),
    );
    (node, executor)
}

#[tokio::test]
async fn test_spoke_apply_renders_and_restarts_once() {
    let (node, executor) = spoke();
    let orchestrator =
        Orchestrator::new(node.config(), executor.clone()).with_hostname("node1.local");

    let report = orchestrator.apply().await.unwrap();

    assert_eq!(report.identity.role, Role::Spoke);
    assert_eq!(report.responders, 2);
    assert_eq!(report.restarted, vec!["wg1", "wg2"]);
    assert!(report.known_hosts.is_none());
    assert!(report.hub.is_none());
    assert!(report.facts_refreshed);
    assert!(node
        .read_conf("wg1")
        .contains(&format!("PublicKey = {}\nAllowedIPs = 10.78.0.0/24\nEndpoint = 203.0.113.10:51820", fake_wg_key(42))));
    assert!(node.read_conf("wg2").contains("Endpoint = 203.0.113.10:51821"));
    assert_eq!(executor.count("salt-call --local mine.update"), 1);

    // A second boot with nothing new changes nothing
    let again = orchestrator.apply().await.unwrap();
    assert!(again.planes.iter().all(|plane| !plane.changed));
    assert!(again.restarted.is_empty());
    assert_eq!(executor.count("systemctl restart"), 2);
    assert_eq!(executor.count("wg genkey"), 2);
}

#[tokio::test]
async fn test_plane_subset_from_config() {
    let (node, executor) = spoke();
    let mut config = node.config();
    config.vpn.planes = Some(vec!["wg2".to_string()]);
    let orchestrator = Orchestrator::new(config, executor.clone()).with_hostname("node1");

    let report = orchestrator.apply().await.unwrap();

    assert_eq!(report.planes.len(), 1);
    assert_eq!(report.planes[0].plane, "wg2");
    assert_eq!(node.read_conf("wg1"), common::base_config("wg1", "10.78.0.2", 51820));
    assert_eq!(executor.count("systemctl restart wg-quick@wg1"), 0);
}

#[tokio::test]
async fn test_fleet_not_ready_aborts_before_rendering() {
    let node = TestNode::new("10.78.0.2", "10.79.0.2");
    let executor = Arc::new(ScriptedExecutor::new());
    wg_tools(&executor);
    executor.on("test.ping", output_ok(r#"{"node1.local": true}"#));
    let orchestrator =
        Orchestrator::new(node.config(), executor.clone()).with_hostname("node1.local");

    let err = orchestrator.apply().await.unwrap_err();

    assert!(matches!(
        err,
        DarksiteError::FleetNotReady { responders: 1, expected: 2, attempts: 3 }
    ));
    assert_eq!(executor.count("test.ping"), 3);
    assert_eq!(node.read_conf("wg1"), common::base_config("wg1", "10.78.0.2", 51820));
    assert_eq!(executor.count("systemctl"), 0);
}

#[tokio::test]
async fn test_unknown_host_is_fatal() {
    let (node, executor) = spoke();
    let orchestrator =
        Orchestrator::new(node.config(), executor.clone()).with_hostname("stranger.local");

    let err = orchestrator.apply().await.unwrap_err();

    assert!(matches!(err, DarksiteError::IdentityUnresolved { .. }));
    assert_eq!(executor.count("wg genkey"), 0);
}

#[tokio::test]
async fn test_hub_apply_runs_full_hub_phase() {
    let (node, executor) = hub();
    let prober = Arc::new(OpenProber::default());
    let orchestrator = Orchestrator::new(node.config(), executor.clone())
        .with_hostname("master.local")
        .with_prober(prober.clone());

    let report = orchestrator.apply().await.unwrap();

    assert_eq!(report.identity.role, Role::Hub);
    assert!(report.hub_error.is_none());
    let hub = report.hub.expect("hub phase report");
    assert_eq!(hub.key_installed_on, 2);
    assert_eq!(hub.gate.reached, vec!["10.78.0.2"]);
    assert!(hub.gate.is_complete());

    // Loopback controller entry is never probed
    assert_eq!(
        prober.connected.lock().unwrap().iter().cloned().collect::<Vec<_>>(),
        vec!["10.78.0.2"]
    );

    let wg1 = node.read_conf("wg1");
    assert!(wg1.contains("# node1.local (wg1)"));
    assert!(wg1.contains(&format!("PublicKey = {}\nAllowedIPs = 10.78.0.2/32", fake_wg_key(7))));
    assert!(!wg1.contains("# master.local"));

    let known = report.known_hosts.expect("known_hosts seeded");
    assert_eq!(known.scanned, 4);
    assert!(node.known_hosts().exists());

    assert_eq!(executor.count("-m ping"), 1);
    assert_eq!(executor.count("ansible-playbook -vvv -i"), 1);
    assert!(node.root().join("sudoers.d/ansible").exists());
    assert!(node.root().join("artifacts").is_dir());
}

#[tokio::test]
async fn test_hub_phase_failure_is_swallowed_unless_strict() {
    let (node, executor) = hub();
    executor.on("ansible-playbook", output_fail(2, "PLAY RECAP failed=1"));
    let orchestrator = Orchestrator::new(node.config(), executor.clone())
        .with_hostname("master.local")
        .with_prober(Arc::new(OpenProber::default()));

    let report = orchestrator.apply().await.unwrap();

    assert!(report.hub.is_none());
    assert!(report.hub_error.unwrap().contains("rc=2"));
    assert!(report.facts_refreshed);

    let mut strict = node.config();
    strict.strict = true;
    let orchestrator = Orchestrator::new(strict, executor.clone())
        .with_hostname("master.local")
        .with_prober(Arc::new(OpenProber::default()));

    let err = orchestrator.apply().await.unwrap_err();
    assert!(matches!(err, DarksiteError::PlaybookFailed { code: 2, .. }));
}

#[tokio::test]
async fn test_hub_without_playbooks_is_fatal() {
    let node = TestNode::new("10.78.0.1", "10.79.0.1");
    let executor = Arc::new(ScriptedExecutor::new());
    let orchestrator =
        Orchestrator::new(node.config(), executor.clone()).with_hostname("master.local");

    let err = orchestrator.apply().await.unwrap_err();

    assert!(matches!(err, DarksiteError::MissingArtifact { .. }));
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_refresh_planes_skips_readiness_and_hub_phase() {
    let (node, executor) = spoke();
    let orchestrator =
        Orchestrator::new(node.config(), executor.clone()).with_hostname("node1.local");

    let outcomes = orchestrator.refresh_planes(&["wg1".to_string()]).await.unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].changed);
    assert_eq!(executor.count("test.ping"), 0);
    assert_eq!(executor.count("mine.update"), 0);
    assert_eq!(executor.count("systemctl restart wg-quick@wg1.service"), 1);

    let err = orchestrator.refresh_planes(&["wg9".to_string()]).await.unwrap_err();
    assert!(matches!(err, DarksiteError::MissingPlaneSpec { .. }));
}

#[tokio::test]
async fn test_check_seed_summary() {
    let (node, executor) = spoke();
    let orchestrator = Orchestrator::new(node.config(), executor.clone()).with_hostname("node1");

    let summary = orchestrator.check_seed(None).await.unwrap();

    assert_eq!(summary.path, node.seed_path());
    assert_eq!(summary.identity.node, "node1.local");
    assert_eq!(summary.identity.hub, "master.local");
    assert_eq!(summary.nodes, 2);
    let text = summary.to_string();
    assert!(text.contains("role:  spoke"));
    assert!(text.contains("plane wg2: cidr=10.79.0.0/24 port=51821 address=10.79.0.2"));
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_inventory_listing() {
    let (node, executor) = hub();
    let orchestrator = Orchestrator::new(node.config(), executor);

    let targets = orchestrator.inventory().await.unwrap();

    assert_eq!(targets.len(), 2);
    assert_eq!(targets[1].hostname, "node1.local");
    assert_eq!(targets[1].address, "10.78.0.2");
}
