use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::config::HubConfig;
use crate::logging::LogLevel;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "model-hub",
    version,
    about = "Launch model training scripts and keep track of their processes"
)]
pub struct Cli {
    /// Config file (defaults to <config dir>/model-hub/hub.config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Base directory for the model script paths
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Program used to run the model scripts
    #[arg(long)]
    pub interpreter: Option<String>,

    /// Remove exited processes from the table as soon as a status check sees them
    #[arg(long)]
    pub prune_on_query: bool,

    /// Log verbosity
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Print the registered models and exit
    #[arg(long)]
    pub list: bool,

    /// Save the effective configuration (file plus overrides) and exit
    #[arg(long)]
    pub write_config: bool,
}

impl Cli {
    /// Load the config file and apply the command-line overrides on top
    pub fn resolve_config(&self) -> HubConfig {
        let mut config = HubConfig::load(self.config.as_deref());
        if let Some(root) = &self.root {
            config.root = Some(root.clone());
        }
        if let Some(interpreter) = &self.interpreter {
            config.interpreter = interpreter.clone();
        }
        if self.prune_on_query {
            config.prune_on_query = true;
        }
        config
    }

    /// `--config` if given, else the per-user default location
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => HubConfig::default_path(),
        }
    }

    /// Persist `config` where the next run will pick it up
    pub fn write_config(&self, config: &HubConfig) -> Result<PathBuf> {
        let path = self.config_path()?;
        config.save(&path)?;
        Ok(path)
    }
}
