use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::app::{APP_NAME, CONFIG_FILE_NAME};
use crate::process::handle::DEFAULT_OUTPUT_LIMIT;
use crate::process::{ModelCatalog, ProcessRegistry, ScriptSpawner};

/// Launcher configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Program that runs the model scripts
    pub interpreter: String,

    /// Base directory for relative script paths; the working directory when unset
    pub root: Option<PathBuf>,

    /// Model name -> script path, in display order
    pub models: Vec<ModelEntry>,

    /// Maximum bytes of captured output kept per process
    pub output_limit_bytes: usize,

    /// Drop exited processes from the table when a status query notices them
    pub prune_on_query: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub script: PathBuf,
}

impl ModelEntry {
    fn new(name: &str, script: &str) -> Self {
        Self {
            name: name.to_string(),
            script: PathBuf::from(script),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            root: None,
            models: vec![
                ModelEntry::new("CRF", "crf_model_training/main.py"),
                ModelEntry::new("BiLSTM", "bilstm_model_training/main.py"),
                ModelEntry::new("BiLSTM+CRF", "bilstm_crf_model_training/main.py"),
                ModelEntry::new("ALBERT", "Legal_NER_ALBERT/main.py"),
                ModelEntry::new("DistilBERT", "DistilBERT_Model_training/main.py"),
            ],
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT,
            prune_on_query: false,
        }
    }
}

impl HubConfig {
    /// Load configuration from `path`, or from the platform config file.
    /// A missing file gives the defaults; an unreadable or malformed one is
    /// logged and also falls back to the defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Ok(path) => path,
                Err(e) => {
                    warn!("{:#}; using default config", e);
                    return Self::default();
                }
            },
        };

        if !config_path.exists() {
            info!("No config at {}, using defaults", config_path.display());
            return Self::default();
        }

        match Self::read(&config_path) {
            Ok(config) => {
                info!("Loaded config from {}", config_path.display());
                config
            }
            Err(e) => {
                warn!("{:#}; using default config", e);
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).with_context(|| format!("Failed to write config {}", path.display()))?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// `<config dir>/model-hub/hub.config.json`
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("Could not determine config directory")?;
        Ok(base.join(APP_NAME).join(CONFIG_FILE_NAME))
    }

    /// Directory relative script paths are resolved against
    pub fn root_dir(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Full path of the interpreter, or the bare name when it is not on PATH.
    /// In the latter case launching fails with a spawn error.
    pub fn resolve_interpreter(&self) -> PathBuf {
        match which::which(&self.interpreter) {
            Ok(path) => path,
            Err(e) => {
                warn!("Interpreter '{}' not found on PATH: {}", self.interpreter, e);
                PathBuf::from(&self.interpreter)
            }
        }
    }

    pub fn catalog(&self) -> ModelCatalog {
        ModelCatalog::new(
            self.root_dir(),
            self.models.iter().map(|m| (m.name.clone(), m.script.clone())),
        )
    }

    /// Build the registry this configuration describes
    pub fn build_registry(&self) -> ProcessRegistry {
        let spawner = ScriptSpawner::new(self.resolve_interpreter()).with_output_limit(self.output_limit_bytes);
        info!(
            "Using interpreter {} for {} models",
            spawner.interpreter().display(),
            self.models.len()
        );
        ProcessRegistry::new(self.catalog(), spawner).with_prune_on_query(self.prune_on_query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_models_table() {
        let config = HubConfig::default();
        let catalog = config.catalog();

        let names: Vec<&str> = catalog.names().collect();
        assert_eq!(names, vec!["CRF", "BiLSTM", "BiLSTM+CRF", "ALBERT", "DistilBERT"]);
        assert!(catalog
            .resolve("CRF")
            .unwrap()
            .ends_with("crf_model_training/main.py"));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HubConfig::load(Some(&dir.path().join("nope.json")));
        assert_eq!(config.models.len(), 5);
        assert_eq!(config.interpreter, "python3");
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let config = HubConfig::load(Some(&path));
        assert_eq!(config.models.len(), 5);
    }

    #[test]
    fn test_save_then_load_partial_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hub.config.json");

        let config = HubConfig {
            interpreter: "sh".to_string(),
            root: Some(dir.path().to_path_buf()),
            models: vec![ModelEntry::new("Echo", "echo/run.sh")],
            prune_on_query: true,
            ..HubConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = HubConfig::load(Some(&path));
        assert_eq!(loaded.interpreter, "sh");
        assert_eq!(loaded.models, vec![ModelEntry::new("Echo", "echo/run.sh")]);
        assert!(loaded.prune_on_query);
        assert_eq!(loaded.output_limit_bytes, DEFAULT_OUTPUT_LIMIT);
    }

    #[test]
    fn test_fields_default_individually() {
        let config: HubConfig = serde_json::from_str(r#"{"interpreter": "python3.11"}"#).unwrap();
        assert_eq!(config.interpreter, "python3.11");
        assert_eq!(config.models.len(), 5);
        assert!(!config.prune_on_query);
    }

    #[test]
    fn test_unknown_interpreter_kept_verbatim() {
        let config = HubConfig {
            interpreter: "definitely-not-an-interpreter-xyz".to_string(),
            ..HubConfig::default()
        };
        assert_eq!(config.resolve_interpreter(), PathBuf::from("definitely-not-an-interpreter-xyz"));
    }
}
