use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DarksiteError {
    #[error("Seed file not found. Tried: {}", format_paths(.tried))]
    SeedNotFound { tried: Vec<PathBuf> },

    #[error("Invalid seed document: {0}")]
    InvalidSeed(String),

    #[error("Missing {path} (base interface config must exist)")]
    MissingBaseConfig { path: PathBuf },

    #[error("This node ({hostname}) not found in seed nodes")]
    IdentityUnresolved { hostname: String },

    #[error("Seed has no hub entry: {reason}")]
    MissingHub { reason: String },

    #[error("Seed missing {plane} ip for {node}")]
    MissingPlaneIp { node: String, plane: String },

    #[error("Seed missing planes.{plane}")]
    MissingPlaneSpec { plane: String },

    #[error("Seed missing endpoint for hub {node}")]
    MissingEndpoint { node: String },

    #[error("Could not obtain hub {plane} public key via the command mesh")]
    HubKeyUnavailable { plane: String },

    #[error("Command mesh not ready: {responders} responders (expected {expected}) after {attempts} attempts")]
    FleetNotReady {
        responders: usize,
        expected: usize,
        attempts: u32,
    },

    #[error("Invalid {kind} key: {reason}")]
    InvalidKey { kind: String, reason: String },

    #[error("Missing {what}: {path}")]
    MissingArtifact { what: String, path: PathBuf },

    #[error("Command '{command}' failed: {details}")]
    CommandFailed { command: String, details: String },

    #[error("Playbook stage '{stage}' failed with rc={code}")]
    PlaybookFailed { stage: String, code: i32 },

    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Temporary failure: {details}")]
    TemporaryFailure { details: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid input for {field}: {message}")]
    InvalidInput { field: String, message: String },

    #[error("File operation '{operation}' failed on {path}: {source}")]
    FileOperation {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type DarksiteResult<T> = std::result::Result<T, DarksiteError>;

impl DarksiteError {
    /// Wrap an I/O error with the operation and path that produced it
    pub fn file(operation: &str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DarksiteError::FileOperation {
            operation: operation.to_string(),
            path: path.into(),
            source,
        }
    }

    /// Errors worth retrying when polling an external system
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DarksiteError::TemporaryFailure { .. }
                | DarksiteError::Timeout { .. }
                | DarksiteError::CommandFailed { .. }
                | DarksiteError::IoError(_)
        )
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
