//! WireGuard plane management: keys, config files, backups and topology

pub mod backup;
pub mod config_file;
pub mod keys;
pub mod topology;

pub use config_file::{is_published_key, validate_wg_key, PeerStanza};
pub use keys::{KeyManager, KeypairStatus};
pub use topology::{RenderOutcome, TopologyRenderer};
