use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{error, info, warn};

use super::catalog::ModelCatalog;
use super::error::{LaunchError, RegistryError};
use super::handle::{ProcessHandle, ProcessInfo};
use super::spawner::Spawner;

/// Outcome of `stop_all`
#[derive(Debug, Default)]
pub struct StopAllSummary {
    pub stopped: Vec<String>,
    pub failed: Vec<RegistryError>,
}

/// Registry for launched model processes.
///
/// Owns the active table (model name -> at most one handle). It is meant to
/// be driven from a single thread; wrap it in `state::SharedRegistry` to share.
pub struct ProcessRegistry {
    catalog: ModelCatalog,
    spawner: Box<dyn Spawner>,
    active: HashMap<String, ProcessHandle>,
    prune_on_query: bool,
}

impl ProcessRegistry {
    pub fn new(catalog: ModelCatalog, spawner: impl Spawner + 'static) -> Self {
        Self {
            catalog,
            spawner: Box::new(spawner),
            active: HashMap::new(),
            prune_on_query: false,
        }
    }

    /// Drop entries whose process has exited whenever `is_running` notices.
    pub fn with_prune_on_query(mut self, prune: bool) -> Self {
        self.prune_on_query = prune;
        self
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn resolve(&self, model: &str) -> Result<PathBuf, RegistryError> {
        self.catalog.resolve(model)
    }

    /// Start the script registered for `model` and record it.
    ///
    /// Any existing entry for the same name is replaced. The replaced process
    /// is not signalled; it keeps running detached from the registry.
    pub fn launch(&mut self, model: &str) -> Result<&ProcessHandle, LaunchError> {
        let script = self.catalog.resolve(model)?;
        if !script.exists() {
            error!("Model file not found at {}", script.display());
            return Err(RegistryError::PathNotFound {
                model: model.to_string(),
                path: script,
            });
        }

        let working_dir = script
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.catalog.root().to_path_buf());

        let spawned = self
            .spawner
            .spawn(model, &script, &working_dir)
            .map_err(|source| {
                error!("Error launching {}: {}", model, source);
                RegistryError::SpawnFailure {
                    model: model.to_string(),
                    source,
                }
            })?;

        let handle = ProcessHandle::new(model, script, spawned.child, spawned.output);
        info!("Launched {} model (PID: {})", model, handle.pid());

        let slot = match self.active.entry(model.to_string()) {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.get_mut();
                if previous.is_alive() {
                    warn!(
                        "Replacing live entry for {} (PID: {}); previous process left running",
                        model,
                        previous.pid()
                    );
                }
                occupied.insert(handle);
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => vacant.insert(handle),
        };
        Ok(slot)
    }

    /// Whether the process recorded for `model` is still alive.
    /// Re-queries the OS on every call.
    pub fn is_running(&mut self, model: &str) -> bool {
        let alive = match self.active.get_mut(model) {
            Some(handle) => handle.is_alive(),
            None => return false,
        };

        if !alive && self.prune_on_query {
            self.active.remove(model);
            info!("Pruned exited process for {}", model);
        }
        alive
    }

    /// Request termination of `model`'s process.
    ///
    /// `Ok(false)` when there is no entry or the process already exited; no
    /// signal is sent in either case. On a live process the entry is removed
    /// whether or not the request could be delivered.
    pub fn try_stop(&mut self, model: &str) -> Result<bool, RegistryError> {
        let handle = match self.active.get_mut(model) {
            Some(handle) => handle,
            None => return Ok(false),
        };

        if !handle.is_alive() {
            if self.prune_on_query {
                self.active.remove(model);
            }
            return Ok(false);
        }

        let pid = handle.pid();
        let sent = handle.terminate();
        self.active.remove(model);

        match sent {
            Ok(()) => {
                info!("Stopped {} model (PID: {})", model, pid);
                Ok(true)
            }
            Err(source) => Err(RegistryError::TerminateFailure {
                model: model.to_string(),
                pid,
                source,
            }),
        }
    }

    /// Like `try_stop`, with delivery failures logged and reported as `false`.
    pub fn stop(&mut self, model: &str) -> bool {
        match self.try_stop(model) {
            Ok(stopped) => stopped,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    /// Stop every registered model; one failure does not prevent the others.
    pub fn stop_all(&mut self) -> StopAllSummary {
        let models: Vec<String> = self.active.keys().cloned().collect();
        info!("Stopping {} tracked processes", models.len());

        let mut summary = StopAllSummary::default();
        for model in models {
            match self.try_stop(&model) {
                Ok(true) => summary.stopped.push(model),
                Ok(false) => {}
                Err(e) => {
                    error!("{}", e);
                    summary.failed.push(e);
                }
            }
        }
        summary
    }

    /// Remove entries whose process has exited on its own.
    pub fn prune_exited(&mut self) -> Vec<String> {
        let mut finished = Vec::new();
        self.active.retain(|model, handle| {
            let alive = handle.is_alive();
            if !alive {
                finished.push(model.clone());
            }
            alive
        });

        for model in &finished {
            info!("Cleaned up finished process for {}", model);
        }
        finished
    }

    /// Snapshot of every tracked entry, stale ones included.
    /// `running` is polled per entry, so exited processes show as `false`.
    pub fn list(&mut self) -> Vec<ProcessInfo> {
        let mut infos: Vec<ProcessInfo> = self.active.values_mut().map(ProcessHandle::snapshot).collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        infos
    }

    /// Names of tracked models whose process is alive right now
    pub fn running_models(&mut self) -> Vec<String> {
        let models: Vec<String> = self.catalog.names().map(str::to_string).collect();
        models.into_iter().filter(|m| self.is_running(m)).collect()
    }

    pub fn get(&self, model: &str) -> Option<&ProcessHandle> {
        self.active.get(model)
    }

    pub fn pid(&self, model: &str) -> Option<u32> {
        self.active.get(model).map(ProcessHandle::pid)
    }

    /// Captured stdout/stderr of `model`'s process, if it has an entry
    pub fn output(&self, model: &str) -> Option<String> {
        self.active.get(model).map(ProcessHandle::output)
    }

    pub fn clear_output(&self, model: &str) -> bool {
        match self.active.get(model) {
            Some(handle) => {
                handle.clear_output();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::handle::{ManagedChild, OutputBuffer, OutputStream};
    use crate::process::spawner::SpawnedChild;
    use parking_lot::Mutex;
    use std::io;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    /// Shared switches for one fake process
    #[derive(Default)]
    struct FakeState {
        exited: AtomicBool,
        terminate_fails: AtomicBool,
        terminate_calls: AtomicU32,
    }

    struct FakeChild {
        pid: u32,
        state: Arc<FakeState>,
    }

    impl ManagedChild for FakeChild {
        fn pid(&self) -> u32 {
            self.pid
        }

        fn has_exited(&mut self) -> io::Result<bool> {
            Ok(self.state.exited.load(Ordering::SeqCst))
        }

        fn terminate(&mut self) -> io::Result<()> {
            self.state.terminate_calls.fetch_add(1, Ordering::SeqCst);
            if self.state.terminate_fails.load(Ordering::SeqCst) {
                return Err(io::Error::from_raw_os_error(libc::EPERM));
            }
            self.state.exited.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeSpawner {
        next_pid: Arc<AtomicU32>,
        children: Arc<Mutex<HashMap<String, Arc<FakeState>>>>,
        spawned_in: Arc<Mutex<Vec<PathBuf>>>,
        fail_with: Arc<Mutex<Option<io::ErrorKind>>>,
    }

    impl FakeSpawner {
        fn state(&self, model: &str) -> Arc<FakeState> {
            self.children.lock()[model].clone()
        }
    }

    impl Spawner for FakeSpawner {
        fn spawn(&self, model: &str, _script: &Path, working_dir: &Path) -> io::Result<SpawnedChild> {
            if let Some(kind) = *self.fail_with.lock() {
                return Err(io::Error::from(kind));
            }
            self.spawned_in.lock().push(working_dir.to_path_buf());

            let pid = 4000 + self.next_pid.fetch_add(1, Ordering::SeqCst);
            let state = Arc::new(FakeState::default());
            self.children.lock().insert(model.to_string(), state.clone());

            let output = OutputBuffer::shared(1024);
            output.lock().push(OutputStream::Stdout, format!("{} started", model));
            Ok(SpawnedChild {
                child: Box::new(FakeChild { pid, state }),
                output,
            })
        }
    }

    /// Scripts for A, B and C that exist on disk, plus one missing script
    fn fixture() -> (tempfile::TempDir, ProcessRegistry, FakeSpawner) {
        let dir = tempfile::tempdir().unwrap();
        for sub in ["a", "b", "c"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
            std::fs::write(dir.path().join(sub).join("main.py"), "print('hi')\n").unwrap();
        }
        let catalog = ModelCatalog::new(
            dir.path(),
            [
                ("A", "a/main.py"),
                ("B", "b/main.py"),
                ("C", "c/main.py"),
                ("Missing", "missing/main.py"),
            ],
        );
        let spawner = FakeSpawner::default();
        let registry = ProcessRegistry::new(catalog, spawner.clone());
        (dir, registry, spawner)
    }

    #[test]
    fn test_unknown_model_fails_resolve_and_launch() {
        let (_dir, mut registry, _) = fixture();

        assert!(matches!(registry.resolve("Z"), Err(RegistryError::UnknownModel { .. })));
        assert!(matches!(registry.launch("Z"), Err(RegistryError::UnknownModel { .. })));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_missing_script_leaves_table_unchanged() {
        let (_dir, mut registry, spawner) = fixture();
        registry.launch("A").unwrap();

        let err = registry.launch("Missing").unwrap_err();
        assert!(matches!(err, RegistryError::PathNotFound { .. }));
        assert_eq!(registry.active_count(), 1);
        assert!(!spawner.children.lock().contains_key("Missing"));
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let (_dir, mut registry, spawner) = fixture();
        *spawner.fail_with.lock() = Some(io::ErrorKind::PermissionDenied);

        let err = registry.launch("A").unwrap_err();
        assert!(matches!(err, RegistryError::SpawnFailure { .. }));
        assert!(!registry.is_running("A"));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_launch_uses_script_directory() {
        let (dir, mut registry, spawner) = fixture();
        let pid = registry.launch("B").unwrap().pid();

        assert_eq!(pid, 4000);
        let expected = dir.path().join("b");
        assert_eq!(spawner.spawned_in.lock().as_slice(), &[expected]);
        assert_eq!(registry.output("B").as_deref(), Some("B started\n"));
    }

    #[test]
    fn test_launch_run_stop_lifecycle() {
        let (_dir, mut registry, spawner) = fixture();

        registry.launch("A").unwrap();
        assert!(registry.is_running("A"));
        assert!(registry.stop("A"));
        assert!(!registry.is_running("A"));
        assert_eq!(spawner.state("A").terminate_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_without_entry_is_noop() {
        let (_dir, mut registry, _) = fixture();
        assert!(!registry.stop("A"));
        assert!(!registry.stop("not-registered"));
    }

    #[test]
    fn test_stop_twice() {
        let (_dir, mut registry, spawner) = fixture();
        registry.launch("A").unwrap();

        assert!(registry.stop("A"));
        assert!(!registry.stop("A"));
        assert_eq!(spawner.state("A").terminate_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exited_process_is_stale_but_not_running() {
        let (_dir, mut registry, spawner) = fixture();
        registry.launch("A").unwrap();
        spawner.state("A").exited.store(true, Ordering::SeqCst);

        assert!(!registry.is_running("A"));
        assert!(!registry.is_running("A"));
        assert_eq!(registry.active_count(), 1);

        // no signal for a process that is already gone
        assert!(!registry.stop("A"));
        assert_eq!(spawner.state("A").terminate_calls.load(Ordering::SeqCst), 0);

        assert_eq!(registry.prune_exited(), vec!["A".to_string()]);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_prune_on_query() {
        let (_dir, registry, spawner) = fixture();
        let mut registry = registry.with_prune_on_query(true);
        registry.launch("A").unwrap();
        registry.launch("B").unwrap();
        spawner.state("A").exited.store(true, Ordering::SeqCst);

        assert!(!registry.is_running("A"));
        assert!(registry.get("A").is_none());
        assert!(registry.is_running("B"));
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_stop_all_continues_past_failure() {
        let (_dir, mut registry, spawner) = fixture();
        for model in ["A", "B", "C"] {
            registry.launch(model).unwrap();
        }
        spawner.state("B").terminate_fails.store(true, Ordering::SeqCst);

        let summary = registry.stop_all();

        let mut stopped = summary.stopped.clone();
        stopped.sort();
        assert_eq!(stopped, vec!["A".to_string(), "C".to_string()]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].model(), "B");
        for model in ["A", "B", "C"] {
            assert!(!registry.is_running(model));
            assert_eq!(spawner.state(model).terminate_calls.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn test_try_stop_surfaces_terminate_failure() {
        let (_dir, mut registry, spawner) = fixture();
        registry.launch("C").unwrap();
        spawner.state("C").terminate_fails.store(true, Ordering::SeqCst);

        let err = registry.try_stop("C").unwrap_err();
        assert!(matches!(err, RegistryError::TerminateFailure { pid: 4000, .. }));
        assert!(registry.get("C").is_none());
    }

    #[test]
    fn test_relaunch_overwrites_entry() {
        let (_dir, mut registry, _) = fixture();
        let first = registry.launch("A").unwrap().pid();
        let second = registry.launch("A").unwrap().pid();

        assert_ne!(first, second);
        assert_eq!(registry.pid("A"), Some(second));
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_running_models_follows_catalog_order() {
        let (_dir, mut registry, spawner) = fixture();
        registry.launch("C").unwrap();
        registry.launch("A").unwrap();
        registry.launch("B").unwrap();
        spawner.state("B").exited.store(true, Ordering::SeqCst);

        assert_eq!(registry.running_models(), vec!["A".to_string(), "C".to_string()]);
    }

    #[test]
    fn test_clear_output() {
        let (_dir, mut registry, _) = fixture();
        registry.launch("A").unwrap();

        assert!(registry.clear_output("A"));
        assert_eq!(registry.output("A").as_deref(), Some(""));
        assert!(!registry.clear_output("B"));
    }

    #[test]
    fn test_list_marks_exited_entries() {
        let (_dir, mut registry, spawner) = fixture();
        registry.launch("A").unwrap();
        registry.launch("B").unwrap();
        spawner.state("A").exited.store(true, Ordering::SeqCst);

        let infos = registry.list();
        assert_eq!(infos.len(), 2);
        let running = |model: &str| infos.iter().find(|i| i.model == model).map(|i| i.running);
        assert_eq!(running("A"), Some(false));
        assert_eq!(running("B"), Some(true));
        assert!(registry.get("B").unwrap().info().running);
    }
}
