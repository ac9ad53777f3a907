//! Router served on the secure listener.
//!
//! # Responsibilities
//! - Create the Axum Router with the endpoint's own handlers
//! - Wire up middleware (request ID, tracing)
//!
//! The listener accepts any router; this is the one the binary uses.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::lifecycle::LifecycleState;

/// Application state injected into handlers.
#[derive(Debug, Clone)]
pub struct EndpointStatus {
    pub name: String,
    pub service_name: String,
    pub acl_rules: usize,
    pub state: watch::Receiver<LifecycleState>,
}

#[derive(Debug, Serialize)]
struct StatusBody<'a> {
    name: &'a str,
    service: &'a str,
    state: &'static str,
    acl_rules: usize,
}

/// Build the router with all middleware layers.
pub fn endpoint_router(status: EndpointStatus) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status_handler))
        .with_state(status)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn healthz(State(status): State<EndpointStatus>) -> impl IntoResponse {
    let state = *status.state.borrow();
    match state {
        LifecycleState::Running => (StatusCode::OK, "ok"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, state.as_str()),
    }
}

async fn status_handler(State(status): State<EndpointStatus>) -> impl IntoResponse {
    let state = status.state.borrow().as_str();
    Json(StatusBody {
        name: &status.name,
        service: &status.service_name,
        state,
        acl_rules: status.acl_rules,
    })
    .into_response()
}
