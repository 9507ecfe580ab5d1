//! API route definitions.

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::auth_middleware;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let sessions = state.sessions.clone();

    // Protected routes (require an active session)
    let protected_routes = Router::new()
        .route("/auth/session", get(handlers::check_session))
        // User management
        .route("/users", get(handlers::get_all_users))
        .route("/users", post(handlers::add_edit_user))
        .route("/users/{id}", get(handlers::get_user))
        .route("/users/{id}", delete(handlers::remove_user))
        // Configuration catalog
        .route("/configurations", get(handlers::get_all_configurations))
        .route("/configurations", post(handlers::add_edit_configuration))
        .route("/configurations/{id}", get(handlers::get_configuration))
        .route("/configurations/{id}", delete(handlers::remove_configuration))
        .route(
            "/configurations/{id}/download",
            get(handlers::download_configuration),
        )
        .route("/tracks", get(handlers::get_available_tracks))
        .route("/cars", get(handlers::get_available_cars))
        // Global settings
        .route("/settings", get(handlers::get_settings))
        .route("/settings", put(handlers::save_settings))
        // Instance lifecycle
        .route("/instances/start", post(handlers::start_instance))
        .route("/instances/{pid}/stop", post(handlers::stop_instance))
        // Instance logs
        .route("/instances/logs", get(handlers::get_all_logs))
        .route("/instances/logs", delete(handlers::delete_all_logs))
        .route("/instances/logs/{name}", get(handlers::read_log))
        .route("/instances/logs/{name}", delete(handlers::delete_log))
        .route(
            "/instances/logs/{name}/download",
            get(handlers::download_log),
        )
        .layer(middleware::from_fn_with_state(sessions, auth_middleware))
        .with_state(state.clone());

    // Public routes (no authentication)
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        // Running-instance overview carries no sensitive data
        .route("/instances", get(handlers::get_all_instances))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .layer(trace_layer)
}

/// Build the CORS layer based on configuration.
///
/// With no configured origins, allows common local development origins.
fn build_cors_layer(state: &AppState) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];

    let headers = [
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        header::ACCEPT,
        header::ORIGIN,
        header::COOKIE,
    ];

    let origins: Vec<HeaderValue> = if state.allowed_origins.is_empty() {
        tracing::warn!("CORS: no origins configured, allowing localhost origins");
        ["http://localhost:3000", "http://127.0.0.1:3000"]
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect()
    } else {
        state
            .allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect()
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(true)
}
