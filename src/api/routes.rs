use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::{self, Next},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::auth::{auth_middleware, AuthService};

use super::handlers::{
    health_check, index, stats, table_stats, track, tracking_script, AppState,
};

pub fn create_router(state: Arc<AppState>, auth_service: Arc<AuthService>) -> Router {
    let tracking_routes = Router::new()
        .route("/track", get(track).post(track))
        .route("/analytics.js", get(tracking_script))
        .layer(CorsLayer::permissive())
        .with_state(Arc::clone(&state));

    let protected_routes = Router::new()
        .route("/stats", get(stats))
        .route("/stats/{table}", get(table_stats))
        .route_layer(middleware::from_fn(move |headers: HeaderMap, req: Request, next: Next| {
            let auth = Arc::clone(&auth_service);
            auth_middleware(auth, headers, req, next)
        }))
        .with_state(state);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .merge(tracking_routes)
        .merge(protected_routes)
}
