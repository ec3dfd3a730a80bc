pub mod common;
pub mod config;
pub mod error;
pub mod exec;
pub mod gate;
pub mod identity;
pub mod inventory;
pub mod known_hosts;
pub mod mesh;
pub mod playbook;
pub mod retry;
pub mod seed;
pub mod trust;
pub mod vpn;

// Test helpers are exposed for integration tests
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::{DarksiteError, DarksiteResult};
