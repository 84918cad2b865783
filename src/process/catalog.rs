use std::path::{Path, PathBuf};

use super::error::RegistryError;

/// Fixed table of launchable models: logical name -> script path relative to `root`.
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    root: PathBuf,
    entries: Vec<(String, PathBuf)>,
}

impl ModelCatalog {
    /// Entries keep their insertion order so front ends can render them as given.
    /// A later duplicate name replaces the earlier path in place.
    pub fn new<I, N, P>(root: impl Into<PathBuf>, entries: I) -> Self
    where
        I: IntoIterator<Item = (N, P)>,
        N: Into<String>,
        P: Into<PathBuf>,
    {
        let mut table: Vec<(String, PathBuf)> = Vec::new();
        for (name, path) in entries {
            let name = name.into();
            let path = path.into();
            match table.iter_mut().find(|(existing, _)| *existing == name) {
                Some(slot) => slot.1 = path,
                None => table.push((name, path)),
            }
        }

        Self { root: root.into(), entries: table }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a model name to the absolute location of its script.
    /// Existence on disk is not checked here.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, RegistryError> {
        let relative = self
            .entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, path)| path)
            .ok_or_else(|| RegistryError::UnknownModel { name: name.to_string() })?;

        Ok(absolutize(&self.root.join(relative)))
    }
}

/// Make a path absolute against the current directory without touching the filesystem.
fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}
