//! PortRegistry — the single public entry point for all registry operations.
//!
//! Every mutation runs a full load → decide → save cycle under one
//! process-wide lock, so two concurrent requests can never claim the same
//! port or double-release a record. Read-only operations load without the
//! lock; a slightly stale answer is acceptable for them.
//!
//! Storage I/O and liveness probes are blocking, so each cycle runs on
//! tokio's blocking pool. The lock guard moves into the blocking task and is
//! released only after the save, even if the awaiting request is dropped.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::allocator::{Allocator, Assignment, PortCheck, PortRequest};
use crate::config::AllocationConfig;
use crate::error::{RegistryError, Result};
use crate::probe::{PortProbe, TcpProbe};
use crate::store::{AllocationRecord, JsonFileStore, RegistryState, RegistryStore};

/// A registered service together with its current live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub port: u16,
    pub project: String,
    pub description: String,
    pub in_use: bool,
}

impl ServiceStatus {
    fn from_record(record: AllocationRecord, in_use: bool) -> Self {
        Self {
            port: record.port,
            project: record.project,
            description: record.description,
            in_use,
        }
    }
}

/// Counts reported by the registry root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySummary {
    pub registered_services: usize,
    pub next_available: Option<u16>,
}

/// Shared handle over the store, the probe, and the allocation lock.
///
/// Cheap to clone; all clones serialize through the same lock.
#[derive(Clone)]
pub struct PortRegistry {
    store: Arc<dyn RegistryStore>,
    probe: Arc<dyn PortProbe>,
    allocator: Allocator,
    lock: Arc<Mutex<()>>,
}

impl PortRegistry {
    pub fn new(
        store: Arc<dyn RegistryStore>,
        probe: Arc<dyn PortProbe>,
        allocator: Allocator,
    ) -> Self {
        Self {
            store,
            probe,
            allocator,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Build a registry backed by a JSON file at `path` and a TCP probe.
    pub fn open(path: &Path, config: &AllocationConfig) -> Self {
        tracing::info!(path = %path.display(), floor = config.floor, "opening port registry");
        Self::new(
            Arc::new(JsonFileStore::new(path)),
            Arc::new(TcpProbe::new(config.probe_timeout())),
            Allocator::from_config(config),
        )
    }

    /// Request a port for a service. Sticky: a registered service gets its port back.
    pub async fn request_port(&self, request: PortRequest) -> Result<Assignment> {
        let guard = self.lock.clone().lock_owned().await;
        let (store, probe, allocator) = self.parts();

        let assignment = run_blocking(move || {
            let _guard = guard;
            let mut state = store.load()?;
            let assignment = allocator.request_port(&mut state, &request, probe.as_ref())?;
            if assignment.assigned_now {
                store.save(&state)?;
            }
            Ok(assignment)
        })
        .await?;

        if assignment.assigned_now {
            tracing::info!(service = %assignment.service, port = assignment.port, "assigned new port");
        } else {
            tracing::debug!(service = %assignment.service, port = assignment.port, "returning existing assignment");
        }
        Ok(assignment)
    }

    /// Release a service's port. Returns the record that was removed.
    pub async fn release_port(&self, service: &str) -> Result<AllocationRecord> {
        let service = service.trim();
        if service.is_empty() {
            return Err(RegistryError::MalformedRequest(
                "service name must not be empty".to_string(),
            ));
        }

        let guard = self.lock.clone().lock_owned().await;
        let (store, _, allocator) = self.parts();
        let name = service.to_string();

        let record = run_blocking(move || {
            let _guard = guard;
            let mut state = store.load()?;
            let record = allocator.release_port(&mut state, &name)?;
            store.save(&state)?;
            Ok(record)
        })
        .await?;

        tracing::info!(service, port = record.port, "released port");
        Ok(record)
    }

    /// Registered owner and live state of a single port.
    pub async fn check_port(&self, port: u16) -> Result<PortCheck> {
        let (store, probe, allocator) = self.parts();
        run_blocking(move || {
            let state = store.load()?;
            Ok(allocator.check_port(&state, port, probe.as_ref()))
        })
        .await
    }

    /// One service's record and live state.
    pub async fn lookup(&self, service: &str) -> Result<ServiceStatus> {
        let (store, probe, _) = self.parts();
        let name = service.trim().to_string();
        run_blocking(move || {
            let mut state = store.load()?;
            let record = state
                .services
                .remove(&name)
                .ok_or(RegistryError::NotFound(name))?;
            let in_use = probe.is_port_in_use(record.port);
            Ok(ServiceStatus::from_record(record, in_use))
        })
        .await
    }

    /// Every registered service with its live state, keyed by service name.
    pub async fn list_ports(&self) -> Result<BTreeMap<String, ServiceStatus>> {
        let (store, probe, _) = self.parts();
        run_blocking(move || {
            let state = store.load()?;
            Ok(state
                .services
                .into_iter()
                .map(|(name, record)| {
                    let in_use = probe.is_port_in_use(record.port);
                    (name, ServiceStatus::from_record(record, in_use))
                })
                .collect())
        })
        .await
    }

    pub async fn summary(&self) -> Result<RegistrySummary> {
        let state = self.snapshot().await?;
        Ok(RegistrySummary {
            registered_services: state.services.len(),
            next_available: state.next_available,
        })
    }

    /// Current persisted state, without probing.
    pub async fn snapshot(&self) -> Result<RegistryState> {
        let store = self.store.clone();
        run_blocking(move || store.load()).await
    }

    fn parts(&self) -> (Arc<dyn RegistryStore>, Arc<dyn PortProbe>, Allocator) {
        (
            self.store.clone(),
            self.probe.clone(),
            self.allocator.clone(),
        )
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| RegistryError::Storage("registry task".to_string(), e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::tests::FakeProbe;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn registry_with(store: Arc<dyn RegistryStore>, probe: Arc<FakeProbe>) -> PortRegistry {
        PortRegistry::new(store, probe, Allocator::new(8002, u16::MAX))
    }

    fn memory_registry(live: &[u16]) -> PortRegistry {
        registry_with(
            Arc::new(MemoryStore::default()),
            Arc::new(FakeProbe::with_live(live)),
        )
    }

    /// Probe that takes a while on every port, so a cycle is still running
    /// when its caller goes away.
    #[derive(Default)]
    struct SlowProbe {
        probes: AtomicUsize,
    }

    impl PortProbe for SlowProbe {
        fn is_port_in_use(&self, _port: u16) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
            false
        }
    }

    /// Store whose saves always fail, for checking that nothing half-commits.
    struct ReadOnlyStore(MemoryStore);

    impl RegistryStore for ReadOnlyStore {
        fn load(&self) -> Result<RegistryState> {
            self.0.load()
        }

        fn save(&self, _state: &RegistryState) -> Result<()> {
            Err(RegistryError::Storage(
                "read-only".to_string(),
                "permission denied".to_string(),
            ))
        }
    }

    #[tokio::test]
    async fn test_spec_example_sequence() {
        let registry = memory_registry(&[]);

        let first = registry
            .request_port(PortRequest::new("api", "proj"))
            .await
            .unwrap();
        assert_eq!((first.port, first.assigned_now), (8002, true));

        let second = registry
            .request_port(PortRequest::new("api", "proj"))
            .await
            .unwrap();
        assert_eq!((second.port, second.assigned_now), (8002, false));

        let conflict = registry
            .request_port(PortRequest::new("worker", "proj").with_preferred_port(8002))
            .await;
        assert!(matches!(
            conflict,
            Err(RegistryError::Conflict { owner: Some(owner), .. }) if owner == "api"
        ));
    }

    #[tokio::test]
    async fn test_concurrent_requests_get_distinct_ports() {
        let registry = memory_registry(&[]);

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .request_port(PortRequest::new(format!("svc-{}", i), "load"))
                    .await
            }));
        }

        let mut ports = Vec::new();
        for handle in handles {
            ports.push(handle.await.unwrap().unwrap().port);
        }
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), 16);
        assert_eq!(ports.first(), Some(&8002));
        assert_eq!(ports.last(), Some(&8017));
    }

    #[tokio::test]
    async fn test_dropped_request_keeps_lock_until_saved() {
        let store = Arc::new(MemoryStore::default());
        let probe = Arc::new(SlowProbe::default());
        let registry = PortRegistry::new(
            store.clone(),
            probe.clone(),
            Allocator::new(8002, u16::MAX),
        );

        let first = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.request_port(PortRequest::new("a", "")).await })
        };
        while probe.probes.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        first.abort();

        // The abandoned cycle still commits, and the next one sees its record.
        let second = registry
            .request_port(PortRequest::new("b", ""))
            .await
            .unwrap();
        assert_eq!(second.port, 8003);

        let state = store.load().unwrap();
        assert_eq!(state.services["a"].port, 8002);
        assert_eq!(state.services["b"].port, 8003);
    }

    #[tokio::test]
    async fn test_failed_save_commits_nothing() {
        let store = Arc::new(ReadOnlyStore(MemoryStore::default()));
        let registry = registry_with(store.clone(), Arc::new(FakeProbe::default()));

        let result = registry.request_port(PortRequest::new("api", "")).await;
        assert!(matches!(result, Err(RegistryError::Storage(..))));
        assert_eq!(store.load().unwrap(), RegistryState::default());

        // A second attempt is still a fresh assignment, not a sticky hit.
        let again = registry.request_port(PortRequest::new("api", "")).await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_release_then_not_found() {
        let registry = memory_registry(&[]);
        registry
            .request_port(PortRequest::new("api", ""))
            .await
            .unwrap();

        let released = registry.release_port("api").await.unwrap();
        assert_eq!(released.port, 8002);

        for _ in 0..2 {
            let result = registry.release_port("api").await;
            assert!(matches!(result, Err(RegistryError::NotFound(s)) if s == "api"));
        }

        let summary = registry.summary().await.unwrap();
        assert_eq!(summary.registered_services, 0);
        assert_eq!(summary.next_available, Some(8003));
    }

    #[tokio::test]
    async fn test_release_empty_name_is_malformed() {
        let registry = memory_registry(&[]);
        let result = registry.release_port("").await;
        assert!(matches!(result, Err(RegistryError::MalformedRequest(_))));
    }

    #[tokio::test]
    async fn test_lookup_and_list_report_liveness() {
        let probe = Arc::new(FakeProbe::default());
        let registry = registry_with(Arc::new(MemoryStore::default()), probe.clone());
        registry
            .request_port(PortRequest::new("api", "shop").with_description("REST"))
            .await
            .unwrap();
        registry
            .request_port(PortRequest::new("web", "shop"))
            .await
            .unwrap();

        probe.set_live(8002, true);

        let api = registry.lookup("api").await.unwrap();
        assert_eq!(api.port, 8002);
        assert_eq!(api.description, "REST");
        assert!(api.in_use);

        let all = registry.list_ports().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all["api"].in_use);
        assert!(!all["web"].in_use);

        let padded = registry.lookup(" api ").await.unwrap();
        assert_eq!(padded.port, 8002);

        let missing = registry.lookup("nope").await;
        assert!(matches!(missing, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_check_port_reads_latest_state() {
        let registry = memory_registry(&[]);
        assert!(registry.check_port(8002).await.unwrap().free);

        registry
            .request_port(PortRequest::new("api", ""))
            .await
            .unwrap();
        let check = registry.check_port(8002).await.unwrap();
        assert_eq!(check.registered_to.as_deref(), Some("api"));
        assert!(!check.free);
    }

    #[tokio::test]
    async fn test_file_backed_registry_survives_restart() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("registry.json");
        let config = AllocationConfig {
            probe_timeout_ms: 50,
            ..Default::default()
        };

        // Let the OS pick a port nothing is listening on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let first = PortRegistry::open(&path, &config);
        let assigned = first
            .request_port(PortRequest::new("api", "").with_preferred_port(port))
            .await
            .unwrap();
        assert_eq!(assigned.port, port);

        let reopened = PortRegistry::open(&path, &config);
        let again = reopened
            .request_port(PortRequest::new("api", ""))
            .await
            .unwrap();
        assert_eq!(again.port, port);
        assert!(!again.assigned_now);
    }
}
