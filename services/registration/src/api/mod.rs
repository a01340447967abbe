//! HTTP API handlers and routing.
//!
//! Everything lives under `/api`:
//! - public: health, registration, login, verification, password reset
//! - `/api/user`: the logged-in, activated user
//! - `/api/admin`: admin-only management

mod auth;
mod authz;
pub mod error;
mod health;
mod me;
pub mod request_context;
mod shifts;
mod spots;
mod users;

use std::str::FromStr;

use axum::{
    http::{header, Method},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api::error::ApiError;
use crate::state::AppState;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(Any);

    let admin = Router::new()
        .nest("/users", users::routes())
        .nest("/spots", spots::admin_routes())
        .nest("/shifts", shifts::admin_routes());

    let api = Router::new()
        .merge(health::routes())
        .merge(auth::routes())
        .nest("/user", me::routes())
        .nest("/admin", admin);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Parses a typed id from a path segment, answering 400 on garbage.
pub(crate) fn parse_path_id<T: FromStr>(
    raw: &str,
    kind: &str,
    request_id: &str,
) -> Result<T, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request(format!("invalid_{kind}_id"), format!("Invalid {kind} ID format"))
            .with_request_id(request_id.to_string())
    })
}
