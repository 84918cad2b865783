/// Process management for launched model scripts
/// Resolves model names to scripts, spawns them and tracks one process per model

pub mod catalog;
pub mod error;
pub mod handle;
pub mod registry;
pub mod spawner;

pub use catalog::ModelCatalog;
pub use error::{LaunchError, RegistryError};
pub use handle::{ManagedChild, OutputStream, ProcessHandle, ProcessInfo};
pub use registry::{ProcessRegistry, StopAllSummary};
pub use spawner::{ScriptSpawner, SpawnedChild, Spawner};
