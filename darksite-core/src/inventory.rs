//! Configuration engine inventory parsing
//!
//! Only the INI-style host lines matter here: `<hostname> ansible_host=<ip> ...`.
//! Comments (`#`, `;`), blank lines and `[group]` headers are skipped.

use crate::common::read_optional_text;
use crate::error::DarksiteResult;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// A host the configuration engine will connect to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InventoryTarget {
    pub hostname: String,
    /// Management address from `ansible_host=`
    pub address: String,
}

impl InventoryTarget {
    /// Loopback targets never need trust seeding or reachability checks
    pub fn is_local(&self) -> bool {
        is_local_address(&self.address)
    }
}

pub fn is_local_address(address: &str) -> bool {
    address.eq_ignore_ascii_case("localhost") || address.starts_with("127.") || address == "::1"
}

/// Parse inventory text into unique targets, preserving first-seen order
pub fn parse(text: &str) -> Vec<InventoryTarget> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') || line.starts_with('[') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(hostname) = parts.next() else {
            continue;
        };
        let address = parts
            .find_map(|part| part.strip_prefix("ansible_host="))
            .map(str::trim)
            .unwrap_or_default();
        if address.is_empty() {
            continue;
        }

        let target = InventoryTarget {
            hostname: hostname.to_string(),
            address: address.to_string(),
        };
        if seen.insert(target.clone()) {
            targets.push(target);
        }
    }
    targets
}

/// Read and parse the inventory; a missing file yields no targets
pub async fn load(path: &Path) -> DarksiteResult<Vec<InventoryTarget>> {
    match read_optional_text(path, "inventory").await? {
        Some(text) => {
            let targets = parse(&text);
            debug!(targets = targets.len(), "Parsed inventory {}", path.display());
            Ok(targets)
        }
        None => {
            debug!("Inventory {} does not exist", path.display());
            Ok(Vec::new())
        }
    }
}

/// Hostnames and addresses, each once, in first-seen order
pub fn scan_names(targets: &[InventoryTarget]) -> Vec<String> {
    let mut seen = HashSet::new();
    targets
        .iter()
        .flat_map(|target| [target.hostname.as_str(), target.address.as_str()])
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect()
}

/// Management addresses worth probing: unique, loopback excluded
pub fn remote_addresses(targets: &[InventoryTarget]) -> Vec<String> {
    let mut seen = HashSet::new();
    targets
        .iter()
        .filter(|target| !target.is_local())
        .map(|target| target.address.as_str())
        .filter(|address| seen.insert(*address))
        .map(str::to_string)
        .collect()
}
