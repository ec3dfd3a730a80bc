//! Default configuration values for darksite
//!
//! This module centralizes all default values to make them easy to find and modify.

use std::time::Duration;

// Seed discovery
pub const DEFAULT_SEED_PATHS: &[&str] = &[
    "/root/darksite/cluster-seed/peers.json",
    "/root/darksite/cluster-seed.json",
];
pub const DEFAULT_POST_BOOT_PAUSE_SECS: u64 = 10;

// Command mesh defaults
pub const DEFAULT_MESH_TARGET: &str = "*";
pub const DEFAULT_EXPECTED_MINIONS: usize = 15;
pub const DEFAULT_MESH_PING_RETRIES: u32 = 80;
pub const DEFAULT_MESH_PING_INTERVAL_SECS: u64 = 3;
pub const DEFAULT_MESH_PING_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MESH_CALL_TIMEOUT_SECS: u64 = 90;
pub const DEFAULT_MESH_CALL_RETRIES: u32 = 2;
pub const DEFAULT_MESH_CALL_RETRY_DELAY_SECS: u64 = 1;
pub const DEFAULT_SALT_BIN: &str = "salt";
pub const DEFAULT_SALT_CALL_BIN: &str = "salt-call";

// WireGuard plane defaults
pub const DEFAULT_WG_DIR: &str = "/etc/wireguard";
pub const DEFAULT_WG_BACKUP_KEEP: usize = 10;
pub const DEFAULT_WG_KEEPALIVE_SECS: u16 = 25;
pub const DEFAULT_WG_UNIT_TEMPLATE: &str = "wg-quick@{plane}.service";
pub const DEFAULT_WG_SETTLE_SECS: u64 = 8;
pub const DEFAULT_HUB_PREFIX: &str = "master";

// SSH trust defaults
pub const DEFAULT_SERVICE_USER: &str = "ansible";
pub const DEFAULT_SERVICE_HOME: &str = "/home/ansible";
pub const DEFAULT_KNOWN_HOSTS: &str = "/srv/darksite/known_hosts";
pub const DEFAULT_SUDOERS_DIR: &str = "/etc/sudoers.d";
pub const DEFAULT_KEYSCAN_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_ARTIFACT_DIRS: &[&str] = &[
    "/srv/ansible/artifacts",
    "/srv/ansible/artifacts/etcd-pki",
    "/srv/darksite",
];

// Reachability gate defaults
pub const DEFAULT_REACHABILITY_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_GATE_TICK_MS: u64 = 1500;
pub const DEFAULT_GATE_CONNECT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_GATE_PROBE_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_GATE_PROGRESS_SECS: u64 = 15;
pub const DEFAULT_ADMIN_PORT: u16 = 22;

// Playbook defaults
pub const DEFAULT_ANSIBLE_BASE: &str = "/srv/ansible";
pub const DEFAULT_ANSIBLE_INVENTORY: &str = "inventory/hosts.ini";
pub const DEFAULT_ANSIBLE_SITE: &str = "site.yml";
pub const DEFAULT_ANSIBLE_VERBOSITY: &str = "-vvv";
pub const DEFAULT_PLAYBOOK_PING_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_PLAYBOOK_RUN_TIMEOUT_SECS: u64 = 6 * 60 * 60;

// Helper functions for Duration creation
pub const fn duration_ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

pub const fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
