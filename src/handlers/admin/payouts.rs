use axum::{
    extract::{Extension, State},
    http::HeaderMap,
};
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::{Json, Path, Query};
use crate::middleware::Principal;
use crate::models::{AuditAction, PayoutOutcome, PayoutRequest, PayoutStatus};
use crate::pagination::{Paginated, PaginationQuery};
use crate::payouts;
use crate::util::AuditLogBuilder;

#[derive(Debug, Deserialize)]
pub struct AdminPayoutQuery {
    #[serde(flatten)]
    pub pagination: PaginationQuery,
    pub creator_id: Option<String>,
    pub status: Option<PayoutStatus>,
}

/// Payout queue across all creators.
pub async fn list_all_payouts(
    State(state): State<AppState>,
    Query(query): Query<AdminPayoutQuery>,
) -> Result<Json<Paginated<PayoutRequest>>> {
    let conn = state.db.get()?;
    let (items, total) = payouts::list(
        &conn,
        query.creator_id.as_deref(),
        query.status,
        query.pagination.limit(),
        query.pagination.offset(),
    )?;
    Ok(Json(Paginated::from_query(items, total, &query.pagination)))
}

/// `PATCH /payouts/{id}` with `{"status": "processing" | "paid" | "rejected", "reason"?}`.
pub async fn resolve_payout(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Path(payout_id): Path<String>,
    Json(outcome): Json<PayoutOutcome>,
) -> Result<Json<PayoutRequest>> {
    let mut conn = state.db.get()?;
    let audit_conn = state.audit.get()?;

    let payout = payouts::resolve(&mut conn, &payout_id, &outcome, queries::now())?;

    AuditLogBuilder::new(&audit_conn, state.audit_log_enabled, &headers)
        .actor(principal.actor_type(), Some(&principal.user.id))
        .action(AuditAction::ResolvePayout)
        .resource("payout", &payout.id)
        .details(&serde_json::json!({
            "creator_id": payout.creator_id,
            "status": payout.status.as_ref(),
            "rejection_reason": payout.rejection_reason,
        }))
        .save()?;

    Ok(Json(payout))
}
