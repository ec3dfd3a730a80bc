//! Cluster seed document
//!
//! The seed is the static description of the fleet baked into the image:
//! every node's per-plane overlay address and public endpoint, plus each
//! plane's CIDR and listen port.
//!
//! ```json
//! {
//!   "hub": "master.local",
//!   "nodes": {
//!     "master.local": { "endpoint": "1.2.3.4", "wg1": "10.78.0.1" },
//!     "node1.local":  { "endpoint": "1.2.3.5", "wg1": "10.78.0.2" }
//!   },
//!   "planes": { "wg1": { "cidr": "10.78.0.0/24", "port": 51820 } }
//! }
//! ```

use crate::config::vpn::validate_plane_id;
use crate::error::{DarksiteError, DarksiteResult};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One node of the fleet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedNode {
    /// Publicly reachable address spokes dial (hub only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Plane id -> overlay address, plus any other per-node data
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl SeedNode {
    /// Overlay address of this node on `plane`, if it joins that plane
    pub fn plane_ip(&self, plane: &str) -> Option<IpAddr> {
        match self.fields.get(plane) {
            Some(Value::String(raw)) => parse_host_ip(raw),
            _ => None,
        }
    }
}

/// Network parameters of one overlay plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneSpec {
    pub cidr: IpNet,
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Seed {
    pub nodes: BTreeMap<String, SeedNode>,

    #[serde(default)]
    pub planes: BTreeMap<String, PlaneSpec>,

    /// Explicit hub designation; otherwise derived from node names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<String>,
}

impl Seed {
    /// Load the first seed document that exists among `paths`
    pub async fn load(paths: &[PathBuf]) -> DarksiteResult<(PathBuf, Seed)> {
        for path in paths {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                let seed = Self::load_file(path).await?;
                info!(
                    path = %path.display(),
                    nodes = seed.nodes.len(),
                    planes = seed.planes.len(),
                    "Loaded seed"
                );
                return Ok((path.clone(), seed));
            }
            debug!("Seed candidate {} does not exist", path.display());
        }
        Err(DarksiteError::SeedNotFound {
            tried: paths.to_vec(),
        })
    }

    pub async fn load_file(path: &Path) -> DarksiteResult<Seed> {
        let text = crate::common::read_text_with_context(path, "seed").await?;
        let seed: Seed = serde_json::from_str(&text)
            .map_err(|e| DarksiteError::InvalidSeed(format!("{}: {}", path.display(), e)))?;
        seed.validate()?;
        Ok(seed)
    }

    pub fn from_json(text: &str) -> DarksiteResult<Seed> {
        let seed: Seed =
            serde_json::from_str(text).map_err(|e| DarksiteError::InvalidSeed(e.to_string()))?;
        seed.validate()?;
        Ok(seed)
    }

    pub fn validate(&self) -> DarksiteResult<()> {
        if self.nodes.is_empty() {
            return Err(DarksiteError::InvalidSeed("no nodes".to_string()));
        }
        for plane in self.planes.keys() {
            validate_plane_id(plane)?;
        }
        for (name, node) in &self.nodes {
            for plane in self.planes.keys() {
                match node.fields.get(plane) {
                    None | Some(Value::Null) => {}
                    Some(Value::String(raw)) if raw.trim().is_empty() => {}
                    Some(Value::String(raw)) if parse_host_ip(raw).is_some() => {}
                    Some(other) => {
                        return Err(DarksiteError::InvalidSeed(format!(
                            "node {} has invalid {} address {}",
                            name, plane, other
                        )))
                    }
                }
            }
        }
        if let Some(hub) = &self.hub {
            if self.node(hub).is_none() {
                return Err(DarksiteError::InvalidSeed(format!(
                    "hub '{}' is not one of the seed nodes",
                    hub
                )));
            }
        }
        Ok(())
    }

    /// Case-insensitive node lookup returning the canonical name
    pub fn node(&self, name: &str) -> Option<(&str, &SeedNode)> {
        self.nodes
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(candidate, node)| (candidate.as_str(), node))
    }

    pub fn plane(&self, plane: &str) -> DarksiteResult<&PlaneSpec> {
        self.planes
            .get(plane)
            .ok_or_else(|| DarksiteError::MissingPlaneSpec {
                plane: plane.to_string(),
            })
    }

    /// Plane ids in stable order
    pub fn plane_ids(&self) -> Vec<String> {
        self.planes.keys().cloned().collect()
    }

    /// Canonical name of the hub node.
    ///
    /// The explicit `hub` key wins; otherwise the single node named
    /// `<prefix>` or `<prefix>.*` (case-insensitive).
    pub fn hub_name(&self, prefix: &str) -> DarksiteResult<&str> {
        if let Some(hub) = &self.hub {
            return self
                .node(hub)
                .map(|(name, _)| name)
                .ok_or_else(|| DarksiteError::MissingHub {
                    reason: format!("hub '{}' is not one of the seed nodes", hub),
                });
        }

        let prefix = prefix.to_ascii_lowercase();
        let dotted = format!("{}.", prefix);
        let candidates: Vec<&str> = self
            .nodes
            .keys()
            .filter(|name| {
                let lower = name.to_ascii_lowercase();
                lower == prefix || lower.starts_with(&dotted)
            })
            .map(String::as_str)
            .collect();

        match candidates.as_slice() {
            [hub] => Ok(*hub),
            [] => Err(DarksiteError::MissingHub {
                reason: format!("no node named {} or {}*", prefix, dotted),
            }),
            many => Err(DarksiteError::MissingHub {
                reason: format!("ambiguous hub, candidates: {}", many.join(", ")),
            }),
        }
    }
}

/// Accept a bare address or an address with prefix length (`10.78.0.2/24`)
fn parse_host_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<IpNet>().ok().map(|net| net.addr()))
}
