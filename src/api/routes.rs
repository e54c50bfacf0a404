use axum::{
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::handlers::{self, AppState};
use crate::store::ResourceStore;

/// Resource routes, relative to the API prefix.
pub fn create_router<S: ResourceStore + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Collections
        .route(
            "/:resource",
            get(handlers::index::<S>).post(handlers::create::<S>),
        )
        .route("/:resource/count", get(handlers::count::<S>))
        .route("/:resource/search", get(handlers::search::<S>))
        // Single resources
        .route(
            "/:resource/:id",
            get(handlers::show::<S>)
                .post(handlers::update::<S>)
                .put(handlers::update::<S>)
                .delete(handlers::delete::<S>),
        )
        // Children of an owned association
        .route(
            "/:resource/:id/:association",
            get(handlers::list_children::<S>),
        )
}

/// The complete application: resource routes mounted under `api_prefix`, with CORS.
pub fn create_app<S: ResourceStore + 'static>(state: AppState<S>, api_prefix: &str) -> Router {
    let routes = create_router::<S>().with_state(state);
    let prefix = api_prefix.trim_end_matches('/');
    let app = if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(prefix, routes)
    };

    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}
