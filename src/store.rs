//! Persisted registry state.
//!
//! The whole document is loaded and saved as a unit on every operation; there
//! is no in-memory cache, so each caller observes the latest committed state.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

/// One registered service's port. Keyed by service name in [`RegistryState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub port: u16,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub description: String,
}

/// The full persisted document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryState {
    #[serde(default)]
    pub services: BTreeMap<String, AllocationRecord>,
    /// Advisory start for the next unconstrained search.
    #[serde(default)]
    pub next_available: Option<u16>,
}

impl RegistryState {
    /// Name of the service holding `port`, if any.
    pub fn owner_of(&self, port: u16) -> Option<&str> {
        self.services
            .iter()
            .find(|(_, record)| record.port == port)
            .map(|(name, _)| name.as_str())
    }

    pub fn is_registered(&self, port: u16) -> bool {
        self.services.values().any(|record| record.port == port)
    }
}

/// Durable storage for [`RegistryState`].
pub trait RegistryStore: Send + Sync {
    /// Read the current state fresh from storage.
    fn load(&self) -> Result<RegistryState>;

    /// Replace the stored state with `state`.
    fn save(&self, state: &RegistryState) -> Result<()>;
}

/// JSON document on the local filesystem.
///
/// A missing file loads as the empty state. Saves go through a sibling temp
/// file and a rename so a crash mid-write never leaves a truncated document.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_error(&self, e: impl ToString) -> RegistryError {
        RegistryError::Storage(self.path.display().to_string(), e.to_string())
    }
}

impl RegistryStore for JsonFileStore {
    fn load(&self) -> Result<RegistryState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "registry file missing, starting empty");
                return Ok(RegistryState::default());
            }
            Err(e) => return Err(self.storage_error(e)),
        };
        serde_json::from_str(&content).map_err(|e| self.storage_error(e))
    }

    fn save(&self, state: &RegistryState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.storage_error(e))?;
        }

        let mut contents = serde_json::to_string_pretty(state).map_err(|e| self.storage_error(e))?;
        contents.push('\n');

        let temp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| self.storage_error(e))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| self.storage_error(e))?;
        file.sync_all().map_err(|e| self.storage_error(e))?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|e| self.storage_error(e))?;
        Ok(())
    }
}

/// In-process store. Hands out clones, so callers still see load/save semantics.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<RegistryState>,
}

impl MemoryStore {
    pub fn new(state: RegistryState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }
}

impl RegistryStore for MemoryStore {
    fn load(&self) -> Result<RegistryState> {
        self.state
            .lock()
            .map(|state| state.clone())
            .map_err(|e| RegistryError::Storage("memory".to_string(), e.to_string()))
    }

    fn save(&self, state: &RegistryState) -> Result<()> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| RegistryError::Storage("memory".to_string(), e.to_string()))?;
        *guard = state.clone();
        Ok(())
    }
}
