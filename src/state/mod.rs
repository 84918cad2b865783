/// Shared registry state for presentation layers
/// Wraps the single-owner ProcessRegistry so a UI loop, signal handler and
/// command handlers can hold the same table.
///
/// Uses Arc<Mutex<>>; every method takes the lock for exactly one registry call
/// (or one check-then-launch pair in launch_if_idle).

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

use crate::process::{LaunchError, ProcessInfo, ProcessRegistry, RegistryError, StopAllSummary};

#[derive(Clone)]
pub struct SharedRegistry {
    inner: Arc<Mutex<ProcessRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: ProcessRegistry) -> Self {
        Self {
            inner: Arc::new(Mutex::new(registry)),
        }
    }

    /// Model names in catalog order
    pub fn model_names(&self) -> Vec<String> {
        self.inner.lock().catalog().names().map(str::to_string).collect()
    }

    pub fn launch(&self, model: &str) -> Result<ProcessInfo, LaunchError> {
        let mut registry = self.inner.lock();
        registry.launch(model).map(|handle| handle.info().clone())
    }

    /// Launch unless the model already has a live process.
    /// The liveness check and the launch happen under one lock, so two rapid
    /// requests cannot both start a process.
    pub fn launch_if_idle(&self, model: &str) -> Result<ProcessInfo, LaunchError> {
        let mut registry = self.inner.lock();
        if registry.is_running(model) {
            let pid = registry.pid(model).unwrap_or_default();
            info!("{} is already running (PID: {}), not launching again", model, pid);
            return Err(RegistryError::AlreadyRunning {
                model: model.to_string(),
                pid,
            });
        }
        registry.launch(model).map(|handle| handle.info().clone())
    }

    pub fn is_running(&self, model: &str) -> bool {
        self.inner.lock().is_running(model)
    }

    pub fn pid(&self, model: &str) -> Option<u32> {
        self.inner.lock().pid(model)
    }

    pub fn stop(&self, model: &str) -> bool {
        self.inner.lock().stop(model)
    }

    pub fn try_stop(&self, model: &str) -> Result<bool, RegistryError> {
        self.inner.lock().try_stop(model)
    }

    pub fn stop_all(&self) -> StopAllSummary {
        self.inner.lock().stop_all()
    }

    /// `stop_all` without waiting for the lock.
    /// `None` when another holder has it, e.g. a thread that panicked mid-call.
    pub fn try_stop_all(&self) -> Option<StopAllSummary> {
        self.inner.try_lock().map(|mut registry| registry.stop_all())
    }

    pub fn running_models(&self) -> Vec<String> {
        self.inner.lock().running_models()
    }

    pub fn prune_exited(&self) -> Vec<String> {
        self.inner.lock().prune_exited()
    }

    pub fn list(&self) -> Vec<ProcessInfo> {
        self.inner.lock().list()
    }

    pub fn output(&self, model: &str) -> Option<String> {
        self.inner.lock().output(model)
    }

    pub fn clear_output(&self, model: &str) -> bool {
        self.inner.lock().clear_output(model)
    }

    /// Resolve without launching; used to show script locations
    pub fn resolve(&self, model: &str) -> Result<std::path::PathBuf, RegistryError> {
        self.inner.lock().resolve(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ModelCatalog, ScriptSpawner};

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_if_idle_rejects_running_model() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("main.sh");
        std::fs::write(&script, "exec sleep 30\n").unwrap();

        let catalog = ModelCatalog::new(dir.path(), [("CRF", "main.sh")]);
        let state = SharedRegistry::new(ProcessRegistry::new(catalog, ScriptSpawner::new("sh")));

        let info = state.launch_if_idle("CRF").unwrap();
        let err = state.launch_if_idle("CRF").unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRunning { pid, .. } if pid == info.pid));

        assert!(state.stop("CRF"));
        assert!(!state.is_running("CRF"));
    }

    #[test]
    fn test_unknown_model_through_shared_state() {
        let catalog = ModelCatalog::new("/srv/models", [("CRF", "crf/main.py")]);
        let state = SharedRegistry::new(ProcessRegistry::new(catalog, ScriptSpawner::new("python3")));

        assert!(matches!(state.launch_if_idle("GPT"), Err(RegistryError::UnknownModel { .. })));
        assert_eq!(state.model_names(), vec!["CRF".to_string()]);
        assert!(state.stop_all().stopped.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_try_stop_all_skips_held_lock() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.sh"), "exec sleep 30\n").unwrap();
        let catalog = ModelCatalog::new(dir.path(), [("CRF", "main.sh")]);
        let state = SharedRegistry::new(ProcessRegistry::new(catalog, ScriptSpawner::new("sh")));
        state.launch("CRF").unwrap();

        let guard = state.inner.lock();
        assert!(state.try_stop_all().is_none());
        drop(guard);

        let summary = state.try_stop_all().unwrap();
        assert_eq!(summary.stopped, vec!["CRF".to_string()]);
        assert!(!state.is_running("CRF"));
    }
}
