//! Creator-facing endpoints: revenue, balance, payouts and media processing.
//! Admins may call all of them on behalf of any creator.

mod payouts;
mod processing;
mod revenue;

pub use payouts::*;
pub use processing::*;
pub use revenue::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::db::AppState;
use crate::middleware::api_key_auth;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/creators/{creator_id}/revenue-summary", get(get_revenue_summary))
        .route("/creators/{creator_id}/balance", get(get_balance))
        .route(
            "/creators/{creator_id}/payouts",
            post(create_payout).get(list_payouts),
        )
        .route(
            "/creators/{creator_id}/payouts/{payout_id}",
            get(get_payout).delete(withdraw_payout),
        )
        .route(
            "/catalog/{item_id}/processing",
            post(start_processing).get(list_processing_jobs),
        )
        .route("/catalog/{item_id}/processing/{job_id}", get(get_processing_job))
        .layer(middleware::from_fn_with_state(state, api_key_auth))
}
