use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::process::{ProcessInfo, RegistryError};
use crate::state::SharedRegistry;

/// One row of the model list shown by a front end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub name: String,
    pub script: Option<PathBuf>,
    #[serde(rename = "scriptExists")]
    pub script_exists: bool,
    pub running: bool,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopAllResult {
    pub stopped: Vec<String>,
    pub failed: Vec<String>,
}

/// Why a launch request did not start a process, in a form a front end can branch on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message")]
pub enum LaunchFailure {
    UnknownModel(String),
    PathNotFound(String),
    SpawnFailure(String),
    AlreadyRunning(String),
}

impl From<RegistryError> for LaunchFailure {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        match err {
            RegistryError::UnknownModel { .. } => LaunchFailure::UnknownModel(message),
            RegistryError::PathNotFound { .. } => LaunchFailure::PathNotFound(message),
            RegistryError::AlreadyRunning { .. } => LaunchFailure::AlreadyRunning(message),
            RegistryError::SpawnFailure { .. } | RegistryError::TerminateFailure { .. } => {
                LaunchFailure::SpawnFailure(message)
            }
        }
    }
}

impl std::fmt::Display for LaunchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchFailure::UnknownModel(m)
            | LaunchFailure::PathNotFound(m)
            | LaunchFailure::SpawnFailure(m)
            | LaunchFailure::AlreadyRunning(m) => f.write_str(m),
        }
    }
}

/// Status of every registered model, in catalog order
pub fn list_models(state: &SharedRegistry) -> Vec<ModelStatus> {
    state
        .model_names()
        .into_iter()
        .map(|name| {
            let script = state.resolve(&name).ok();
            let script_exists = script.as_deref().map(|p| p.exists()).unwrap_or(false);
            let running = state.is_running(&name);
            let pid = if running { state.pid(&name) } else { None };
            ModelStatus {
                name,
                script,
                script_exists,
                running,
                pid,
            }
        })
        .collect()
}

/// Start a model unless it is already running
pub fn launch_model(state: &SharedRegistry, model: &str) -> Result<ProcessInfo, LaunchFailure> {
    info!("launch_model command called for {}", model);
    state.launch_if_idle(model).map_err(LaunchFailure::from)
}

pub fn model_running(state: &SharedRegistry, model: &str) -> bool {
    state.is_running(model)
}

/// `Ok(false)` when nothing was running under that name
pub fn stop_model(state: &SharedRegistry, model: &str) -> Result<bool, String> {
    info!("stop_model command called for {}", model);
    state.try_stop(model).map_err(|e| e.to_string())
}

pub fn stop_all_models(state: &SharedRegistry) -> StopAllResult {
    let summary = state.stop_all();
    StopAllResult {
        stopped: summary.stopped,
        failed: summary.failed.iter().map(ToString::to_string).collect(),
    }
}

/// Running model names, used to decide whether quitting needs confirmation
pub fn running_models(state: &SharedRegistry) -> Vec<String> {
    state.running_models()
}

pub fn model_output(state: &SharedRegistry, model: &str) -> Result<String, String> {
    state
        .output(model)
        .ok_or_else(|| format!("No process recorded for model '{}'", model))
}

pub fn clear_model_output(state: &SharedRegistry, model: &str) -> Result<(), String> {
    if state.clear_output(model) {
        Ok(())
    } else {
        Err(format!("No process recorded for model '{}'", model))
    }
}

pub fn prune_exited(state: &SharedRegistry) -> Vec<String> {
    state.prune_exited()
}

pub fn tracked_processes(state: &SharedRegistry) -> Vec<ProcessInfo> {
    state.list()
}
