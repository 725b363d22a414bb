//! Endpoints for any authenticated caller: own entitlements, access checks,
//! own API keys and the catalog.

mod access;
mod api_keys;
mod catalog;
mod entitlements;

pub use access::*;
pub use api_keys::*;
pub use catalog::*;
pub use entitlements::*;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use crate::db::AppState;
use crate::middleware::api_key_auth;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/users/{user_id}/entitlements", get(list_entitlements))
        .route("/users/{user_id}/entitlements/{subject_id}", get(get_entitlement))
        .route(
            "/users/{user_id}/entitlements/{subject_id}/cancel",
            post(cancel_entitlement),
        )
        .route(
            "/users/{user_id}/entitlements/{subject_id}/upgrade",
            post(upgrade_entitlement),
        )
        .route("/users/{user_id}/subscription", get(get_subscription))
        .route("/users/{user_id}/api-keys", post(create_api_key).get(list_api_keys))
        .route("/users/{user_id}/api-keys/{key_id}", delete(revoke_api_key))
        .route("/access/{subject_id}", get(check_access))
        .route("/catalog", get(list_catalog))
        .route("/catalog/{item_id}", get(get_catalog_item))
        .layer(middleware::from_fn_with_state(state, api_key_auth))
}
