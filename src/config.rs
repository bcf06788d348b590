//! Port registry configuration — deserialization and validation.

use crate::error::RegistryError;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// The one hardcoded port: where the registry itself listens.
pub const BOOTSTRAP_PORT: u16 = 4444;

/// Top-level registry configuration, parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub registry: AllocationConfig,
}

/// Where the HTTP surface binds.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage location and allocation bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct AllocationConfig {
    /// Registry document path. `None` lets the caller pick a platform default.
    pub path: Option<PathBuf>,
    /// Lowest port handed out by an unconstrained request.
    #[serde(default = "default_floor")]
    pub floor: u16,
    /// Highest port the free-port search will consider.
    #[serde(default = "default_ceiling")]
    pub ceiling: u16,
    /// Connect timeout for the liveness probe, in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    BOOTSTRAP_PORT
}

fn default_floor() -> u16 {
    8002
}

fn default_ceiling() -> u16 {
    u16::MAX
}

fn default_probe_timeout_ms() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            path: None,
            floor: default_floor(),
            ceiling: default_ceiling(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl AllocationConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl RegistryConfig {
    /// Parse a TOML document. Missing sections and fields fall back to defaults.
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| RegistryError::InvalidConfig(e.to_string()))
    }

    /// Validate the config, failing fast before the registry starts serving.
    pub fn validate(&self) -> crate::Result<()> {
        let alloc = &self.registry;

        if alloc.floor == 0 {
            return Err(RegistryError::InvalidConfig(
                "registry.floor must be a valid TCP port (1-65535)".to_string(),
            ));
        }

        if alloc.floor > alloc.ceiling {
            return Err(RegistryError::InvalidConfig(format!(
                "registry.floor {} exceeds registry.ceiling {}",
                alloc.floor, alloc.ceiling
            )));
        }

        if alloc.probe_timeout_ms == 0 {
            return Err(RegistryError::InvalidConfig(
                "registry.probe_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.server.host.is_empty() {
            return Err(RegistryError::InvalidConfig(
                "server.host must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
