//! HTTP surface for the port registry.
//!
//! `http` holds the JSON endpoints, `status_page` renders the HTML overview.
//! Both are thin: every decision is made by [`PortRegistry`].

pub mod http;
pub mod status_page;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::registry::PortRegistry;

/// Shared state handed to every handler.
pub struct AppState {
    pub registry: PortRegistry,
    /// Port the registry itself is reachable on, echoed in links.
    pub public_port: u16,
}

impl AppState {
    pub fn new(registry: PortRegistry, public_port: u16) -> Arc<Self> {
        Arc::new(Self {
            registry,
            public_port,
        })
    }
}

/// Build the registry router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(http::root))
        .route("/status", get(status_page::status_page))
        .route("/ports", get(http::list_ports))
        .route("/ports/request", post(http::request_port))
        .route("/ports/release", post(http::release_port))
        .route("/ports/check/:port", get(http::check_port))
        .route("/ports/:service", get(http::lookup_service))
        .with_state(state)
}
