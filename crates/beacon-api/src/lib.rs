pub mod middleware;
pub mod status;

use std::sync::Arc;

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    middleware::from_fn,
    routing::get,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use beacon_store::StatusStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: StatusStore,
}

/// Badge routes. Read-only: the handlers never write to the store.
pub fn router(store: StatusStore) -> Router {
    let state: AppState = Arc::new(AppStateInner { store });

    // Badges are embedded anywhere, so any origin may read them
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/discord-status", get(status::get_badge))
        .route("/discord-status/refresh", get(status::refresh))
        .layer(from_fn(middleware::no_cache))
        .route("/health", get(status::health))
        .layer(cors)
        .with_state(state)
}
