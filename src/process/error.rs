use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Every failure the registry reports back to its caller.
/// None of these leave the active table in a half-updated state.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown model '{name}'")]
    UnknownModel { name: String },

    #[error("script for model '{model}' not found at {}", path.display())]
    PathNotFound { model: String, path: PathBuf },

    #[error("failed to launch model '{model}': {source}")]
    SpawnFailure {
        model: String,
        #[source]
        source: io::Error,
    },

    #[error("model '{model}' is already running (PID: {pid})")]
    AlreadyRunning { model: String, pid: u32 },

    #[error("failed to send termination to model '{model}' (PID: {pid}): {source}")]
    TerminateFailure {
        model: String,
        pid: u32,
        #[source]
        source: io::Error,
    },
}

/// Launch results use the same taxonomy.
pub type LaunchError = RegistryError;

impl RegistryError {
    /// Name of the model the error is about
    pub fn model(&self) -> &str {
        match self {
            RegistryError::UnknownModel { name } => name,
            RegistryError::PathNotFound { model, .. }
            | RegistryError::SpawnFailure { model, .. }
            | RegistryError::AlreadyRunning { model, .. }
            | RegistryError::TerminateFailure { model, .. } => model,
        }
    }
}
