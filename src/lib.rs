//! Port Registry — local authority for TCP port assignments.
//!
//! Hands out and remembers ports for named services on one machine so that
//! independently started processes never collide. Assignments are sticky,
//! persisted to a JSON document, and checked against live listeners.

pub mod allocator;
pub mod client;
pub mod config;
pub mod error;
pub mod probe;
pub mod registry;
pub mod server;
pub mod store;

pub use allocator::{Allocator, Assignment, PortCheck, PortRequest};
pub use client::{default_registry_url, PortGrant, RegistryClient, REGISTRY_URL_ENV};
pub use config::{AllocationConfig, RegistryConfig, ServerConfig, BOOTSTRAP_PORT};
pub use error::{RegistryError, Result};
pub use probe::{PortProbe, TcpProbe};
pub use registry::{PortRegistry, RegistrySummary, ServiceStatus};
pub use server::{router, AppState};
pub use store::{AllocationRecord, JsonFileStore, MemoryStore, RegistryState, RegistryStore};
