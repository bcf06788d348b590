//! Client for a running registry.
//!
//! An unreachable registry (`RegistryError::Unreachable`) is kept distinct
//! from one that answered with an error (`RegistryError::Rejected`). Only the
//! former may be papered over with a caller-supplied fallback port.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::allocator::{PortCheck, PortRequest};
use crate::config::BOOTSTRAP_PORT;
use crate::error::{RegistryError, Result};
use crate::registry::ServiceStatus;
use crate::server::http::{ErrorResponse, ReleaseRequest, ReleaseResponse, RequestPortResponse};

/// Environment variable overriding the registry base URL.
pub const REGISTRY_URL_ENV: &str = "PORT_REGISTRY_URL";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Base URL from `PORT_REGISTRY_URL`, or the local bootstrap port.
pub fn default_registry_url() -> String {
    std::env::var(REGISTRY_URL_ENV)
        .ok()
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| format!("http://localhost:{}", BOOTSTRAP_PORT))
}

/// A port handed out by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortGrant {
    pub port: u16,
    pub assigned_now: bool,
    pub message: String,
}

/// Thin HTTP client for the registry endpoints.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    http: reqwest::Client,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RegistryError::InvalidConfig(format!("HTTP client: {}", e)))?;
        Ok(Self { base_url, http })
    }

    /// Client for [`default_registry_url`].
    pub fn from_env() -> Result<Self> {
        Self::new(default_registry_url())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask for a port. Sticky on the registry side.
    pub async fn request_port(&self, request: &PortRequest) -> Result<PortGrant> {
        let response: RequestPortResponse = self.post(&["ports", "request"], request).await?;
        Ok(PortGrant {
            port: response.port,
            assigned_now: response.assigned_now,
            message: response.message,
        })
    }

    /// Ask for a port, falling back to `fallback` only when the registry is unreachable.
    ///
    /// Errors reported by the registry itself (conflicts, malformed requests)
    /// are always returned.
    pub async fn port_or_fallback(
        &self,
        request: &PortRequest,
        fallback: Option<u16>,
    ) -> Result<PortGrant> {
        match self.request_port(request).await {
            Err(RegistryError::Unreachable(url, reason)) => match fallback {
                Some(port) => {
                    tracing::warn!(
                        service = %request.service,
                        url = %url,
                        error = %reason,
                        fallback = port,
                        "registry unreachable, using fallback port"
                    );
                    Ok(PortGrant {
                        port,
                        assigned_now: false,
                        message: format!("fallback: :{}", port),
                    })
                }
                None => Err(RegistryError::Unreachable(url, reason)),
            },
            other => other,
        }
    }

    /// Release a service's port. `Ok(false)` if the registry did not know the service.
    pub async fn release_port(&self, service: &str) -> Result<bool> {
        let body = ReleaseRequest {
            service: service.to_string(),
        };
        match self
            .post::<_, ReleaseResponse>(&["ports", "release"], &body)
            .await
        {
            Ok(_) => Ok(true),
            Err(RegistryError::Rejected(404, _)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Port registered to `service`, or `None` if unknown.
    pub async fn registered_port(&self, service: &str) -> Result<Option<u16>> {
        match self.get::<ServiceStatus>(&["ports", service]).await {
            Ok(status) => Ok(Some(status.port)),
            Err(RegistryError::Rejected(404, _)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn check_port(&self, port: u16) -> Result<PortCheck> {
        self.get(&["ports", "check", &port.to_string()]).await
    }

    pub async fn list_ports(&self) -> Result<BTreeMap<String, ServiceStatus>> {
        self.get(&["ports"]).await
    }

    /// Registry URL for `segments`, each one percent-encoded as a single path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let invalid = || RegistryError::InvalidConfig(format!("registry URL '{}'", self.base_url));
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.endpoint(segments)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.decode(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T> {
        let url = self.endpoint(segments)?;
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.decode(response).await
    }

    async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| RegistryError::Rejected(status.as_u16(), e.to_string()));
        }

        let detail = match response.json::<ErrorResponse>().await {
            Ok(body) => body.detail,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        Err(RegistryError::Rejected(status.as_u16(), detail))
    }

    fn transport_error(&self, e: reqwest::Error) -> RegistryError {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            RegistryError::Unreachable(self.base_url.clone(), e.to_string())
        } else {
            RegistryError::Rejected(
                e.status().unwrap_or(StatusCode::BAD_GATEWAY).as_u16(),
                e.to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::tests::FakeProbe;
    use crate::allocator::Allocator;
    use crate::registry::PortRegistry;
    use crate::server::{router, AppState};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    /// Serve a memory-backed registry on an ephemeral port; returns its base URL.
    async fn spawn_registry() -> String {
        let registry = PortRegistry::new(
            Arc::new(MemoryStore::default()),
            Arc::new(FakeProbe::default()),
            Allocator::new(8002, u16::MAX),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let app = router(AppState::new(registry, port));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://127.0.0.1:{}", port)
    }

    /// Base URL of a port nothing listens on.
    fn dead_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}", port)
    }

    #[tokio::test]
    async fn test_request_lookup_release_round_trip() {
        let client = RegistryClient::new(spawn_registry().await).unwrap();
        let request = PortRequest::new("api", "proj").with_description("REST API");

        let grant = client.request_port(&request).await.unwrap();
        assert_eq!(grant.port, 8002);
        assert!(grant.assigned_now);

        let again = client.request_port(&request).await.unwrap();
        assert_eq!(again.port, 8002);
        assert!(!again.assigned_now);

        assert_eq!(client.registered_port("api").await.unwrap(), Some(8002));
        assert_eq!(client.registered_port("ghost").await.unwrap(), None);

        let all = client.list_ports().await.unwrap();
        assert_eq!(all["api"].description, "REST API");

        assert!(client.release_port("api").await.unwrap());
        assert!(!client.release_port("api").await.unwrap());
        assert!(client.check_port(8002).await.unwrap().free);
    }

    #[tokio::test]
    async fn test_conflict_is_rejected_not_fallback() {
        let client = RegistryClient::new(spawn_registry().await).unwrap();
        client
            .request_port(&PortRequest::new("api", "proj"))
            .await
            .unwrap();

        let result = client
            .port_or_fallback(
                &PortRequest::new("worker", "proj").with_preferred_port(8002),
                Some(9999),
            )
            .await;
        assert!(matches!(
            result,
            Err(RegistryError::Rejected(409, detail)) if detail.contains("'api'")
        ));
    }

    #[tokio::test]
    async fn test_unreachable_uses_fallback() {
        let client = RegistryClient::new(dead_url()).unwrap();
        let grant = client
            .port_or_fallback(&PortRequest::new("api", ""), Some(9123))
            .await
            .unwrap();
        assert_eq!(grant.port, 9123);
        assert!(!grant.assigned_now);
    }

    #[tokio::test]
    async fn test_unreachable_without_fallback_is_error() {
        let client = RegistryClient::new(dead_url()).unwrap();
        let result = client
            .port_or_fallback(&PortRequest::new("api", ""), None)
            .await;
        assert!(matches!(result, Err(RegistryError::Unreachable(..))));
    }

    #[tokio::test]
    async fn test_lookup_escapes_reserved_characters() {
        let client = RegistryClient::new(spawn_registry().await).unwrap();
        for (name, port) in [("web/api", 8002), ("svc#1", 8003), ("a?b", 8004), ("x y", 8005)] {
            let grant = client
                .request_port(&PortRequest::new(name, ""))
                .await
                .unwrap();
            assert_eq!(grant.port, port);
            assert_eq!(client.registered_port(name).await.unwrap(), Some(port));
        }
        assert!(client.release_port("web/api").await.unwrap());
        assert_eq!(client.registered_port("web/api").await.unwrap(), None);
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = RegistryClient::new("http://localhost:4444/registry/").unwrap();
        let url = client.endpoint(&["ports", "web/api"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:4444/registry/ports/web%2Fapi");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = RegistryClient::new("http://localhost:4444/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:4444");
    }
}
