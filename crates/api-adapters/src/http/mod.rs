//! # HTTP transport (axum)
//!
//! Thin: routing, extraction and response mapping. Rate limiting, roles and
//! booking rules are all enforced by the gateway behind it.

pub mod extract;
pub mod handlers;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderName, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use services::AdmissionGateway;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<AdmissionGateway>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(gateway: Arc<AdmissionGateway>, metrics: Arc<Metrics>) -> Self {
        Self { gateway, metrics }
    }
}

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/appointment-types", get(handlers::list_appointment_types))
        .route("/slots", get(handlers::list_slots))
        .route("/appointments", post(handlers::create_appointment))
        .route("/appointments/mine", get(handlers::my_appointments))
        .route("/auth/login", post(handlers::login))
        .route("/admin/appointments", get(handlers::list_appointments))
        .route("/admin/appointments/open-count", get(handlers::open_work_count))
        .route("/admin/appointments/{id}", delete(handlers::delete_appointment))
        .route("/admin/appointments/{id}/status", patch(handlers::set_status))
        .route("/admin/appointments/{id}/handled", patch(handlers::set_handled))
        .route("/admin/appointments/{id}/proposal", post(handlers::propose_alternative))
        .route(
            "/admin/availability",
            get(handlers::list_windows).post(handlers::create_window),
        )
        .route("/admin/availability/{id}", put(handlers::update_window))
        .route(
            "/admin/appointment-types",
            get(handlers::list_all_types).post(handlers::create_type),
        )
        .route("/admin/appointment-types/{id}", put(handlers::update_type));

    Router::new()
        .nest("/api", api)
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(middleware::from_fn_with_state(state.clone(), count_requests))
        .layer(cors_policy())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(REQUEST_ID))
        .layer(SetRequestIdLayer::new(REQUEST_ID, MakeRequestUuid))
        .with_state(state)
}

// The UI may be served from another origin.
fn cors_policy() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600))
}

async fn count_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let response = next.run(request).await;
    state.metrics.record_request(method.as_str(), response.status().as_u16());
    response
}
