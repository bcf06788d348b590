//! JSON endpoints.
//!
//! Error bodies carry `detail` (the human-readable message) and `kind`
//! (a stable identifier from [`RegistryError::kind`]).

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::allocator::{PortCheck, PortRequest};
use crate::error::RegistryError;
use crate::registry::ServiceStatus;
use crate::server::AppState;

impl RegistryError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::Exhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unreachable(..) | Self::Rejected(..) => StatusCode::BAD_GATEWAY,
            Self::Storage(..) | Self::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        let body = ErrorResponse {
            detail: self.to_string(),
            kind: self.kind().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, RegistryError>;

/// `GET /` — service summary.
pub async fn root(State(state): State<Arc<AppState>>) -> ApiResult<RootResponse> {
    let summary = state.registry.summary().await?;
    let base = format!("http://localhost:{}", state.public_port);
    Ok(Json(RootResponse {
        name: "Port Registry".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        bootstrap_port: state.public_port,
        registered_services: summary.registered_services,
        next_available: summary.next_available,
        ports: format!("{}/ports", base),
        status: format!("{}/status", base),
    }))
}

/// `GET /ports` — every registration with its live state.
pub async fn list_ports(
    State(state): State<Arc<AppState>>,
) -> ApiResult<BTreeMap<String, ServiceStatus>> {
    Ok(Json(state.registry.list_ports().await?))
}

/// `GET /ports/:service` — one registration, 404 if unknown.
pub async fn lookup_service(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> ApiResult<ServiceStatus> {
    Ok(Json(state.registry.lookup(&service).await?))
}

/// `POST /ports/request` — sticky assignment or preferred-port negotiation.
pub async fn request_port(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PortRequest>, JsonRejection>,
) -> ApiResult<RequestPortResponse> {
    let Json(request) = payload.map_err(malformed)?;
    let assignment = state.registry.request_port(request).await?;

    let message = if assignment.assigned_now {
        format!("new assignment: :{}", assignment.port)
    } else {
        format!("existing assignment: :{}", assignment.port)
    };
    Ok(Json(RequestPortResponse {
        port: assignment.port,
        service: assignment.service,
        assigned_now: assignment.assigned_now,
        message,
    }))
}

/// `POST /ports/release` — drop a registration, 404 if unknown.
pub async fn release_port(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ReleaseRequest>, JsonRejection>,
) -> ApiResult<ReleaseResponse> {
    let Json(request) = payload.map_err(malformed)?;
    let record = state.registry.release_port(&request.service).await?;
    Ok(Json(ReleaseResponse {
        released: request.service.trim().to_string(),
        port: record.port,
    }))
}

/// `GET /ports/check/:port` — registered owner and live state of a port.
pub async fn check_port(
    State(state): State<Arc<AppState>>,
    Path(port): Path<String>,
) -> ApiResult<PortCheck> {
    let port: u16 = port.parse().map_err(|_| {
        RegistryError::MalformedRequest(format!("'{}' is not a valid TCP port", port))
    })?;
    Ok(Json(state.registry.check_port(port).await?))
}

fn malformed(rejection: JsonRejection) -> RegistryError {
    RegistryError::MalformedRequest(rejection.body_text())
}

// Request types

/// Body of `POST /ports/release`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub service: String,
}

// Response types

#[derive(Debug, Serialize, Deserialize)]
pub struct RootResponse {
    pub name: String,
    pub version: String,
    pub bootstrap_port: u16,
    pub registered_services: usize,
    pub next_available: Option<u16>,
    pub ports: String,
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestPortResponse {
    pub port: u16,
    pub service: String,
    pub assigned_now: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub released: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
    #[serde(default)]
    pub kind: String,
}
