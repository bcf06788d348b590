//! Allocation decisions over a loaded [`RegistryState`].
//!
//! The allocator never touches storage: callers load the state, let the
//! allocator mutate it, and persist the result only when the decision
//! succeeded. A rejected request leaves the state untouched.

use serde::{Deserialize, Serialize};

use crate::config::AllocationConfig;
use crate::error::{RegistryError, Result};
use crate::probe::PortProbe;
use crate::store::{AllocationRecord, RegistryState};

/// A caller asking for a port on behalf of a named service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRequest {
    pub service: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub description: String,
    /// Specific port the caller wants. `0` is treated as no preference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_port: Option<u16>,
}

impl PortRequest {
    pub fn new(service: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            project: project.into(),
            description: String::new(),
            preferred_port: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_preferred_port(mut self, port: u16) -> Self {
        self.preferred_port = Some(port);
        self
    }
}

/// Outcome of a successful [`Allocator::request_port`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub service: String,
    pub port: u16,
    /// `false` when the service already held this port.
    pub assigned_now: bool,
}

/// Registered and live state of a single port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCheck {
    pub port: u16,
    pub in_use: bool,
    pub registered_to: Option<String>,
    pub free: bool,
}

/// Decides which port a service gets.
#[derive(Debug, Clone)]
pub struct Allocator {
    floor: u16,
    ceiling: u16,
}

impl Allocator {
    pub fn new(floor: u16, ceiling: u16) -> Self {
        Self { floor, ceiling }
    }

    pub fn from_config(config: &AllocationConfig) -> Self {
        Self::new(config.floor, config.ceiling)
    }

    /// Assign a port to `request.service`, or return the one it already holds.
    ///
    /// On a fresh assignment the record is inserted and `next_available` is
    /// advanced past the assigned port.
    pub fn request_port(
        &self,
        state: &mut RegistryState,
        request: &PortRequest,
        probe: &dyn PortProbe,
    ) -> Result<Assignment> {
        let service = request.service.trim();
        if service.is_empty() {
            return Err(RegistryError::MalformedRequest(
                "service name must not be empty".to_string(),
            ));
        }

        if let Some(existing) = state.services.get(service) {
            return Ok(Assignment {
                service: service.to_string(),
                port: existing.port,
                assigned_now: false,
            });
        }

        let port = match request.preferred_port.filter(|&p| p != 0) {
            Some(preferred) => {
                if let Some(owner) = state.owner_of(preferred) {
                    return Err(RegistryError::Conflict {
                        port: preferred,
                        owner: Some(owner.to_string()),
                    });
                }
                if probe.is_port_in_use(preferred) {
                    return Err(RegistryError::Conflict {
                        port: preferred,
                        owner: None,
                    });
                }
                preferred
            }
            None => self.find_free(state, self.search_start(state), probe)?,
        };

        state.services.insert(
            service.to_string(),
            AllocationRecord {
                port,
                project: request.project.clone(),
                description: request.description.clone(),
            },
        );

        let next = match self.find_free(state, u32::from(port) + 1, probe) {
            Ok(next) => next,
            Err(_) => port.saturating_add(1).min(self.ceiling),
        };
        state.next_available = Some(next);

        tracing::debug!(service, port, next_available = next, "port assigned");

        Ok(Assignment {
            service: service.to_string(),
            port,
            assigned_now: true,
        })
    }

    /// Remove the record for `service`. The `next_available` hint is left alone.
    pub fn release_port(&self, state: &mut RegistryState, service: &str) -> Result<AllocationRecord> {
        state
            .services
            .remove(service)
            .ok_or_else(|| RegistryError::NotFound(service.to_string()))
    }

    /// Report whether `port` is registered, live, or free. Never mutates.
    pub fn check_port(&self, state: &RegistryState, port: u16, probe: &dyn PortProbe) -> PortCheck {
        let registered_to = state.owner_of(port).map(str::to_string);
        let in_use = probe.is_port_in_use(port);
        PortCheck {
            port,
            in_use,
            free: registered_to.is_none() && !in_use,
            registered_to,
        }
    }

    fn search_start(&self, state: &RegistryState) -> u32 {
        u32::from(state.next_available.unwrap_or(self.floor).max(self.floor))
    }

    /// First port at or above `start` that no record holds and the probe sees as idle.
    fn find_free(&self, state: &RegistryState, start: u32, probe: &dyn PortProbe) -> Result<u16> {
        (start..=u32::from(self.ceiling))
            .filter_map(|candidate| u16::try_from(candidate).ok())
            .find(|&candidate| !state.is_registered(candidate) && !probe.is_port_in_use(candidate))
            .ok_or(RegistryError::Exhausted {
                from: start,
                ceiling: self.ceiling,
            })
    }
}
