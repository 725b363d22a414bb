pub mod admin;
pub mod creators;
pub mod users;
pub mod webhooks;

use axum::{Router, routing::get};

use crate::db::AppState;
use crate::extractors::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Every router except rate limiting and tracing, which `main` adds.
pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(users::router(state.clone()))
        .merge(creators::router(state.clone()))
        .merge(admin::router(state))
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .merge(webhooks::router())
}
