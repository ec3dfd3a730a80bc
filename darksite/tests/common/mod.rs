#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use darksite_core::config::{DarksiteConfig, GateConfig, MeshConfig, PlaybookConfig, SshConfig, VpnConfig};
use tempfile::TempDir;

pub const SEED: &str = r#"{
    "nodes": {
        "master.local": { "endpoint": "203.0.113.10", "wg1": "10.78.0.1", "wg2": "10.79.0.1" },
        "node1.local": { "wg1": "10.78.0.2", "wg2": "10.79.0.2" }
    },
    "planes": {
        "wg1": { "cidr": "10.78.0.0/24", "port": 51820 },
        "wg2": { "cidr": "10.79.0.0/24", "port": 51821 }
    }
}"#;

pub const INVENTORY: &str = "\
[controller]
master.local ansible_host=127.0.0.1 ansible_connection=local

[workers]
node1.local ansible_host=10.78.0.2
";

/// A valid ed25519 public key line
pub const SSH_KEY: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHVzZXItdGVzdC1rZXktbWF0ZXJpYWwtMzItYnl0ZXMh ansible@darksite";

pub fn base_config(plane: &str, address: &str, port: u16) -> String {
    format!(
        "[Interface]\n# {}\nAddress = {}/24\nPrivateKey = PRIVATE\nListenPort = {}\n",
        plane, address, port
    )
}

/// A throwaway node filesystem: seed, plane configs, service home, playbook tree
pub struct TestNode {
    pub dir: TempDir,
}

impl TestNode {
    pub fn new(node_address_wg1: &str, node_address_wg2: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let node = Self { dir };
        std::fs::write(node.seed_path(), SEED).unwrap();
        std::fs::create_dir_all(node.wg_dir()).unwrap();
        std::fs::write(node.conf_path("wg1"), base_config("wg1", node_address_wg1, 51820)).unwrap();
        std::fs::write(node.conf_path("wg2"), base_config("wg2", node_address_wg2, 51821)).unwrap();
        std::fs::create_dir_all(node.root().join("sudoers.d")).unwrap();
        node
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn seed_path(&self) -> PathBuf {
        self.root().join("peers.json")
    }

    pub fn wg_dir(&self) -> PathBuf {
        self.root().join("wireguard")
    }

    pub fn conf_path(&self, plane: &str) -> PathBuf {
        self.wg_dir().join(format!("{}.conf", plane))
    }

    pub fn read_conf(&self, plane: &str) -> String {
        std::fs::read_to_string(self.conf_path(plane)).unwrap()
    }

    pub fn ansible_dir(&self) -> PathBuf {
        self.root().join("ansible")
    }

    /// Inventory and site playbook, as the controller has them
    pub fn install_playbooks(&self) {
        std::fs::create_dir_all(self.ansible_dir().join("inventory")).unwrap();
        std::fs::write(self.ansible_dir().join("inventory/hosts.ini"), INVENTORY).unwrap();
        std::fs::write(self.ansible_dir().join("site.yml"), "---\n- hosts: all\n").unwrap();
    }

    /// Pre-existing service account keypair so no ssh-keygen is needed
    pub fn install_service_key(&self) {
        let ssh_dir = self.root().join("home/ansible/.ssh");
        std::fs::create_dir_all(&ssh_dir).unwrap();
        std::fs::write(ssh_dir.join("id_ed25519"), "PRIVATE KEY\n").unwrap();
        std::fs::write(ssh_dir.join("id_ed25519.pub"), format!("{}\n", SSH_KEY)).unwrap();
    }

    pub fn known_hosts(&self) -> PathBuf {
        self.root().join("darksite/known_hosts")
    }

    /// Configuration pointing every path into the temp dir, with no pauses
    pub fn config(&self) -> DarksiteConfig {
        DarksiteConfig {
            seed_paths: vec![self.root().join("missing.json"), self.seed_path()],
            post_boot_pause: Duration::ZERO,
            strict: false,
            mesh: MeshConfig {
                expected_minions: 2,
                ping_retries: 3,
                ping_interval: Duration::from_millis(1),
                call_retry_delay: Duration::from_millis(1),
                ..MeshConfig::default()
            },
            vpn: VpnConfig {
                wg_dir: self.wg_dir(),
                settle: Duration::ZERO,
                ..VpnConfig::default()
            },
            ssh: SshConfig {
                service_home: self.root().join("home/ansible"),
                known_hosts: self.known_hosts(),
                sudoers_dir: self.root().join("sudoers.d"),
                artifact_dirs: vec![self.root().join("artifacts")],
                ..SshConfig::default()
            },
            gate: GateConfig {
                timeout: Duration::from_millis(200),
                tick_interval: Duration::from_millis(10),
                ..GateConfig::default()
            },
            playbook: PlaybookConfig {
                base_dir: self.ansible_dir(),
                run_as_service_user: false,
                ..PlaybookConfig::default()
            },
        }
    }
}
