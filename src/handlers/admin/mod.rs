//! Operator endpoints. Everything here requires an admin API key.

mod audit_logs;
mod catalog;
mod ledger;
mod payment_events;
mod payouts;
mod users;

pub use audit_logs::*;
pub use catalog::*;
pub use ledger::*;
pub use payment_events::*;
pub use payouts::*;
pub use users::*;

use axum::{
    Router, middleware,
    routing::{delete, get, patch, post, put},
};

use crate::db::AppState;
use crate::middleware::require_admin;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // Principals
        .route("/admin/users", post(create_user).get(list_users))
        .route("/admin/users/{user_id}", get(get_user))
        // Catalog
        .route("/admin/catalog", post(create_catalog_item))
        .route("/admin/catalog/{item_id}", put(update_catalog_item))
        .route("/admin/catalog/{item_id}/inclusions", post(add_inclusion))
        .route(
            "/admin/catalog/{item_id}/inclusions/{child_id}",
            delete(remove_inclusion),
        )
        // Ledger
        .route("/admin/share-ratios", get(list_share_ratios))
        .route(
            "/admin/share-ratios/{creator_id}",
            put(set_share_ratio).delete(clear_share_ratio),
        )
        .route("/admin/transactions", get(list_transactions))
        .route("/admin/transactions/{transaction_id}", get(get_transaction))
        .route(
            "/admin/transactions/{transaction_id}/reverse",
            post(reverse_transaction),
        )
        .route("/admin/reconcile", post(run_reconciliation))
        // Payment events
        .route("/admin/payment-events", get(list_payment_events))
        .route("/admin/payment-events/{event_id}", get(get_payment_event))
        .route(
            "/admin/payment-events/{event_id}/redrive",
            post(redrive_payment_event),
        )
        // Payouts
        .route("/admin/payouts", get(list_all_payouts))
        .route("/payouts/{payout_id}", patch(resolve_payout))
        // Audit
        .route("/admin/audit-logs", get(query_audit_logs))
        .layer(middleware::from_fn_with_state(state, require_admin))
}
