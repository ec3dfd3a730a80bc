pub mod orchestrator;

pub use orchestrator::{HubReport, Orchestrator, RunReport, SeedSummary};

// Re-export commonly used types
pub use darksite_core::{
    config::DarksiteConfig,
    error::{DarksiteError, DarksiteResult},
};
