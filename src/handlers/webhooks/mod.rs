pub mod common;
pub mod domestic;
pub mod global;
pub mod unified;

pub use domestic::handle_domestic_webhook;
pub use global::handle_global_webhook;
pub use unified::handle_payment_confirmation;

use axum::{Router, routing::post};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/paypal", post(handle_global_webhook))
        .route("/webhooks/portone", post(handle_domestic_webhook))
        .route("/webhooks/payment-confirmation", post(handle_payment_confirmation))
}
